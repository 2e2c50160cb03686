//! EarShot server: spatializing audio mixer for multi-user virtual spaces
//!
//! Binds one UDP socket, ingests microphone and injector streams from
//! connected clients and runs the mix loop until told to stop. All state
//! lives on the mix thread; the only startup input is the payload string.

mod ingest;
mod net;
mod protocol;

use std::sync::atomic::{AtomicBool, Ordering};

use es_server::{FrameScheduler, MixerConfig, MonotonicClock, Registry};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:24800";

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

fn main() {
    env_logger::init();
    log::info!("starting EarShot mixer");

    let payload = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let config = match MixerConfig::parse(&payload) {
        Ok(config) => config,
        Err(error) => {
            log::error!("{}", error);
            std::process::exit(1);
        }
    };
    if config.dynamic_jitter_buffers {
        log::info!("dynamic jitter buffers enabled");
    }
    if let Some(zone) = config.zones.source_unattenuated_zone {
        log::info!("source unattenuated zone centered at {:?}", zone.center());
    }
    if let Some(zone) = config.zones.listener_unattenuated_zone {
        log::info!("listener unattenuated zone centered at {:?}", zone.center());
    }

    let bind_addr =
        std::env::var("EARSHOT_BIND").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let (sender, receiver) = match net::bind(&bind_addr) {
        Ok(halves) => halves,
        Err(error) => {
            log::error!("failed to bind {}: {}", bind_addr, error);
            std::process::exit(1);
        }
    };
    log::info!("listening on {}", bind_addr);

    let (registry, commands) = Registry::new();
    let mut ingest = ingest::Ingest::new(receiver, commands, config.dynamic_jitter_buffers);

    let clock = MonotonicClock::new();
    let pump_clock = clock.clone();
    let mut scheduler = FrameScheduler::new(registry, &config, sender, clock);
    let shutdown = scheduler.shutdown_handle();

    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
    }

    scheduler.run(|| {
        ingest.pump(&pump_clock);
        if SHUTDOWN.load(Ordering::Acquire) {
            shutdown.stop();
        }
    });

    if ingest.malformed_packets() > 0 {
        log::info!("dropped {} malformed packets", ingest.malformed_packets());
    }
    log::info!("shut down cleanly");
}
