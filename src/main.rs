//! transistor-rt host runner
//!
//! Boots the runtime without a loader context and runs a bounded
//! producer/consumer workload on top of the semaphore API.

use anyhow::Context;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tr_boot::{HostPlatform, Image, ImageBuilder, StdioKind};
use tr_core::{logging, Config, DiagnosticSink};
use tr_pthread::posix::{self, sem_t};
use tr_pthread::Timespec;

const QUEUE_SLOTS: u64 = 8;
const PRODUCERS: u32 = 2;
const ITEMS_PER_PRODUCER: u32 = 1000;
const ITEM_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    logging::init(&config.debug).context("initializing logging")?;

    tracing::info!("Starting transistor-rt");
    tracing::debug!("Configuration: {}", Config::config_path().display());

    // Stand-in for the module image: a small GOT needing relocation
    let builder = ImageBuilder::new(0x40).relative(0x00, 0x00).relative(0x08, 0x20);
    let mut bytes = builder.build();
    let image = Image {
        bytes: &mut bytes,
        dynamic_offset: 0,
        base: 0x7100_0000,
    };

    let mut platform = HostPlatform::new();
    let code = tr_boot::start(
        None,
        image,
        &mut platform,
        &config,
        posix::table(),
        run_workload,
    );

    tracing::info!("main returned {}", code);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Log a failed C-style call and hand back its errno
fn check(rc: i32, call: &str) -> Result<(), i32> {
    if rc == 0 {
        return Ok(());
    }
    let errno = tr_core::errno::errno();
    tracing::error!("{} failed: errno {}", call, errno);
    Err(errno)
}

fn run_workload(argv: &[String], stdio: &Arc<dyn DiagnosticSink>, kind: StdioKind) -> i32 {
    tracing::debug!("argv = {:?}, stdio = {:?}", argv, kind);
    match produce_and_consume(stdio) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn produce_and_consume(stdio: &Arc<dyn DiagnosticSink>) -> Result<(), i32> {
    let mut items: sem_t = 0;
    let mut slots: sem_t = 0;
    check(posix::sem_init(Some(&mut items), 0, 0), "sem_init")?;
    check(posix::sem_init(Some(&mut slots), 0, QUEUE_SLOTS), "sem_init")?;

    let queue = Arc::new(Mutex::new(VecDeque::new()));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || -> Result<(), i32> {
                for i in 0..ITEMS_PER_PRODUCER {
                    check(posix::sem_wait(Some(&slots)), "sem_wait")?;
                    queue.lock().push_back(producer * ITEMS_PER_PRODUCER + i);
                    check(posix::sem_post(Some(&items)), "sem_post")?;
                }
                Ok(())
            })
        })
        .collect();

    // A producer that gave up shows up as a timed-out wait here
    let total = PRODUCERS * ITEMS_PER_PRODUCER;
    let mut sum = 0u64;
    for _ in 0..total {
        let deadline = Timespec::after(ITEM_TIMEOUT);
        check(posix::sem_timedwait(Some(&items), Some(&deadline)), "sem_timedwait")?;
        if let Some(item) = queue.lock().pop_front() {
            sum += u64::from(item);
        }
        check(posix::sem_post(Some(&slots)), "sem_post")?;
    }

    for producer in producers {
        match producer.join() {
            Ok(result) => result?,
            Err(_) => {
                tracing::error!("Producer thread panicked");
                return Err(0);
            }
        }
    }

    let mut free = 0;
    check(posix::sem_getvalue(Some(&slots), &mut free), "sem_getvalue")?;
    stdio.write(&format!(
        "consumed {} items (sum {}), {} slots free\n",
        total, sum, free
    ));

    check(posix::sem_destroy(Some(&mut items)), "sem_destroy")?;
    check(posix::sem_destroy(Some(&mut slots)), "sem_destroy")?;
    Ok(())
}
