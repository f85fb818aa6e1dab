use std::{
    io::{self, IsTerminal as _},
    path::PathBuf,
    process::ExitCode,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use heapdb::{
    benchmark_framework::{print_header, BenchResult},
    DbConfig, DbError, DbIterator, Field, FieldType, HeapDb, HeapFile, LockConfig, Tuple,
    TupleLayout,
};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt, EnvFilter};

const ENV_NAME_LOG: &str = "HEAPDB_LOG";
const TABLE_NAME: &str = "stress.tbl";

/// Hammer one heap file with concurrent inserting transactions, then check nothing was lost.
#[derive(Parser, Debug)]
struct Cli {
    /// Number of writer threads
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Tuples inserted by each thread
    #[arg(short, long, default_value_t = 1000)]
    inserts: usize,

    /// Tuples inserted per transaction
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    batch: u64,

    /// Buffer pool capacity in pages
    #[arg(long, default_value_t = 64)]
    pool_pages: usize,

    /// Wait between lock retries, in milliseconds
    #[arg(long, default_value_t = 10)]
    backoff_ms: u64,

    /// Lock retries before a transaction gives up and is retried from scratch
    #[arg(long, default_value_t = 20)]
    retries: u32,

    /// Database directory. Defaults to a fresh directory under the system temp dir.
    #[arg(long)]
    dir: Option<PathBuf>,
}

fn init_logging() {
    let filter = match std::env::var(ENV_NAME_LOG) {
        Ok(directives) => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(directives),
        Err(_) => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(""),
    };
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .with_timer(fmt::time::SystemTime::default());
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .event_format(format)
        .init();
}

#[derive(Default)]
struct Counters {
    committed: AtomicU64,
    retries: AtomicU64,
}

/// Retriable failures abort the transaction and run the whole batch again
fn is_retriable(err: &DbError) -> bool {
    matches!(err, DbError::LockTimeout { .. } | DbError::BufferPoolFull)
}

fn run_writer(
    db: &HeapDb,
    file: &HeapFile,
    worker: usize,
    cli: &Cli,
    counters: &Counters,
) -> Result<Vec<Duration>, DbError> {
    let mut latencies = Vec::new();
    let mut next = 0;
    while next < cli.inserts {
        let batch = (cli.batch as usize).min(cli.inserts - next);
        let start = Instant::now();
        let txn = db.new_tx();
        let attempt = (next..next + batch).try_for_each(|n| {
            let mut tuple = Tuple::new(vec![Field::Int(worker as i32), Field::Int(n as i32)]);
            txn.insert(file.id(), &mut tuple)
        });
        match attempt.and_then(|()| txn.commit()) {
            Ok(()) => {
                latencies.push(start.elapsed());
                counters
                    .committed
                    .fetch_add(batch as u64, Ordering::Relaxed);
                next += batch;
            }
            Err(e) if is_retriable(&e) => {
                debug!(worker, error = %e, "retrying batch");
                counters.retries.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(latencies)
}

fn count_tuples(db: &HeapDb, file: &HeapFile) -> Result<usize, DbError> {
    let txn = db.new_tx();
    let mut scan = txn.scan(file);
    scan.open()?;
    let mut count = 0;
    while scan.has_next()? {
        scan.next_tuple()?;
        count += 1;
    }
    scan.close();
    drop(scan);
    txn.commit()?;
    Ok(count)
}

fn run(cli: Cli) -> Result<bool, DbError> {
    let dir = cli.dir.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!("heapdb-stress-{}", std::process::id()))
    });
    let config = DbConfig {
        num_pages: cli.pool_pages,
        lock: LockConfig {
            retry_backoff: Duration::from_millis(cli.backoff_ms),
            max_retries: cli.retries,
        },
    };
    let db = Arc::new(HeapDb::new(&dir, config)?);
    let layout = Arc::new(TupleLayout::new(vec![FieldType::Int, FieldType::Int]));
    let file = db.open_table(TABLE_NAME, layout)?;
    let initial = count_tuples(&db, &file)?;
    info!(
        dir = %dir.display(),
        threads = cli.threads,
        inserts = cli.inserts,
        initial,
        "starting stress run"
    );

    let cli = Arc::new(cli);
    let counters = Arc::new(Counters::default());
    let start = Instant::now();
    let handles: Vec<_> = (0..cli.threads)
        .map(|worker| {
            let db = Arc::clone(&db);
            let file = Arc::clone(&file);
            let cli = Arc::clone(&cli);
            let counters = Arc::clone(&counters);
            thread::spawn(move || run_writer(&db, &file, worker, &cli, &counters))
        })
        .collect();

    let mut latencies = Vec::new();
    let mut failed = false;
    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(mut samples)) => latencies.append(&mut samples),
            Ok(Err(e)) => {
                error!(worker, error = %e, "writer failed");
                failed = true;
            }
            Err(_) => {
                error!(worker, "writer panicked");
                failed = true;
            }
        }
    }
    let elapsed = start.elapsed();

    let committed = counters.committed.load(Ordering::Relaxed) as usize;
    let retries = counters.retries.load(Ordering::Relaxed);
    let found = count_tuples(&db, &file)?;
    let expected = initial + committed;

    print_header();
    println!("{}", BenchResult::from_samples("commit", latencies));
    println!();
    println!("threads:     {}", cli.threads);
    println!("committed:   {committed} tuples");
    println!("retries:     {retries}");
    println!("pages:       {}", file.page_count()?);
    println!("elapsed:     {elapsed:.2?}");
    println!(
        "throughput:  {:.0} tuples/s",
        committed as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    if found != expected {
        error!(found, expected, "table does not hold exactly the committed tuples");
        return Ok(false);
    }
    if retries > 0 {
        warn!(retries, "some batches were retried after lock timeouts");
    }
    info!(found, "verified table contents");
    Ok(!failed)
}

fn main() -> ExitCode {
    init_logging();
    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "stress run failed");
            ExitCode::FAILURE
        }
    }
}
