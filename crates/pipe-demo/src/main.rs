use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use common::{TelemetryGuard, setup_logging, wait::wait_for_resource};
use pipe_demo::{
    Consumer, DemoConfig, PipeMetrics, consumer::run_consumer_semaphore, run_consumer,
    run_consumer_hooked, run_producer, shm,
};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use spsc::{HookNotifier, Reader, Semaphore, SemaphoreNotifier, Writer, paths};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

const SERVICE_NAME: &str = "pipe-demo";
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(version, about = "Stream a checked byte sequence through a shared-memory pipe")]
struct Cli {
    /// Payload capacity of the ring in bytes
    #[arg(long, global = true)]
    capacity: Option<usize>,

    /// Bytes the producer writes before closing
    #[arg(long, global = true)]
    total_bytes: Option<u64>,

    /// Largest single write
    #[arg(long, global = true)]
    max_chunk: Option<usize>,

    /// Fixed RNG seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Disable random pauses on both sides
    #[arg(long, global = true)]
    no_jitter: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Producer and consumer threads over an anonymous region
    Run {
        #[arg(long, value_enum, default_value_t = RunWake::Futex)]
        wake: RunWake,
    },
    /// Create a file-backed region and write the sequence into it
    Produce {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ProcessWake::Futex)]
        wake: ProcessWake,
    },
    /// Attach to a file-backed region and check the sequence read from it
    Consume {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ProcessWake::Futex)]
        wake: ProcessWake,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RunWake {
    /// Blocking reads woken natively
    Futex,
    /// Non-blocking reads on a tokio task woken by the writer's hook
    Hook,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ProcessWake {
    Futex,
    /// Writer posts a named semaphore the consumer sleeps on
    Semaphore,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = apply_overrides(DemoConfig::from_env()?, &cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let _telemetry = {
        let _enter = runtime.enter();
        match &config.otlp_endpoint {
            Some(endpoint) => Some(TelemetryGuard::init(
                SERVICE_NAME,
                endpoint,
                config.environment,
            )?),
            None => {
                setup_logging(config.environment)?;
                None
            }
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    tracing::info!(
        capacity = config.capacity,
        total_bytes = config.traffic.total_bytes,
        max_chunk = config.traffic.max_chunk,
        "pipe-demo starting"
    );

    match cli.command {
        Command::Run { wake } => run_in_process(&config, wake, &runtime, &shutdown),
        Command::Produce { path, wake } => {
            produce(&config, path.unwrap_or_else(|| config.region_path.clone()), wake, &shutdown)
        }
        Command::Consume { path, wake } => {
            consume(&config, path.unwrap_or_else(|| config.region_path.clone()), wake, &shutdown)
        }
    }
}

fn apply_overrides(mut config: DemoConfig, cli: &Cli) -> anyhow::Result<DemoConfig> {
    if let Some(capacity) = cli.capacity {
        config.capacity = capacity;
    }
    if let Some(total_bytes) = cli.total_bytes {
        config.traffic.total_bytes = total_bytes;
    }
    if let Some(max_chunk) = cli.max_chunk {
        config.traffic.max_chunk = max_chunk;
    }
    if cli.seed.is_some() {
        config.traffic.seed = cli.seed;
    }
    if cli.no_jitter {
        config.traffic.jitter = false;
    }
    config.validate()?;
    Ok(config)
}

fn run_in_process(
    config: &DemoConfig,
    wake: RunWake,
    runtime: &tokio::runtime::Runtime,
    shutdown: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let region = spsc::allocate(config.capacity).context("Failed to allocate pipe region")?;
    let wakeup = Arc::new(tokio::sync::Notify::new());

    let mut writer = match wake {
        RunWake::Futex => Writer::new(Arc::clone(&region))?,
        RunWake::Hook => {
            let wakeup = Arc::clone(&wakeup);
            let hook = HookNotifier::new("consumer", move |_: &&str| wakeup.notify_one());
            Writer::with_notifier(Arc::clone(&region), hook)?
        }
    };
    let reader = Reader::new(region)?;

    let producer = {
        let traffic = config.traffic.clone();
        let shutdown = Arc::clone(shutdown);
        std::thread::Builder::new()
            .name("producer".into())
            .spawn(move || {
                run_producer(
                    &mut writer,
                    &traffic,
                    &shutdown,
                    &PipeMetrics::new(SERVICE_NAME),
                )
            })
            .context("Failed to spawn producer thread")?
    };

    let consumer = Consumer::new(reader, &config.traffic, PipeMetrics::new(SERVICE_NAME));
    let consumed = match wake {
        RunWake::Futex => run_consumer(consumer, &config.traffic, shutdown),
        RunWake::Hook => runtime.block_on(run_consumer_hooked(
            consumer,
            &config.traffic,
            &wakeup,
            shutdown,
        )),
    };

    let produced = producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;

    let produced = produced.context("Producer failed")?;
    let consumed = consumed.context("Consumer failed")?;
    tracing::info!(
        written = produced.bytes_written,
        read = consumed.bytes_read,
        "pipe-demo finished"
    );
    Ok(())
}

fn produce(
    config: &DemoConfig,
    path: PathBuf,
    wake: ProcessWake,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let region = shm::create_region(&path, config.capacity)?;
    tracing::info!(path = %path.display(), "pipe region created");

    let mut writer = match wake {
        ProcessWake::Futex => Writer::new(region)?,
        ProcessWake::Semaphore => {
            let notifier = SemaphoreNotifier::open(paths::SEMAPHORE_WRITER_NOTIFY)
                .context("Failed to open writer semaphore")?;
            Writer::with_notifier(region, notifier)?
        }
    };

    let stats = run_producer(
        &mut writer,
        &config.traffic,
        shutdown,
        &PipeMetrics::new(SERVICE_NAME),
    )?;
    tracing::info!(written = stats.bytes_written, "producer process finished");
    Ok(())
}

fn consume(
    config: &DemoConfig,
    path: PathBuf,
    wake: ProcessWake,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let Some(region) = wait_for_resource(
        || shm::attach_fresh(&path),
        ATTACH_POLL_INTERVAL,
        "Pipe region",
        shutdown,
    ) else {
        return Ok(());
    };
    let reader = Reader::new(region)?;
    let consumer = Consumer::new(reader, &config.traffic, PipeMetrics::new(SERVICE_NAME));

    let result = match wake {
        ProcessWake::Futex => run_consumer(consumer, &config.traffic, shutdown),
        ProcessWake::Semaphore => {
            let Some(sem) = wait_for_resource(
                || Semaphore::open(paths::SEMAPHORE_WRITER_NOTIFY),
                ATTACH_POLL_INTERVAL,
                "Writer semaphore",
                shutdown,
            ) else {
                return Ok(());
            };
            let result = run_consumer_semaphore(consumer, &config.traffic, &sem, shutdown);
            if let Err(e) = Semaphore::unlink(paths::SEMAPHORE_WRITER_NOTIFY) {
                tracing::warn!(error = %e, "Failed to unlink writer semaphore");
            }
            result
        }
    };

    if let Err(e) = std::fs::remove_file(&path) {
        tracing::warn!(error = %e, path = %path.display(), "Failed to remove pipe region");
    }

    let stats = result?;
    tracing::info!(read = stats.bytes_read, "consumer process finished");
    Ok(())
}
