mod simulated_engine;
mod sound_files;

use simulated_engine::SimulatedEngine;
use sound_files::{MediaFile, SoundBankFile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use streambank::loader::{
    FileHandlerConfig, FileHandlerModule, FileHandlerResult, FileStateBackend, FileStateCatalog,
    OperationOrigin,
};

const GAME_THREAD_COUNT: usize = 4;
const REQUESTS_PER_GAME_THREAD: usize = 50;
const BANK_COUNT: u32 = 4;
const MEDIA_COUNT: u32 = 16;
const FRAME_DURATION: Duration = Duration::from_millis(16);

struct XorShift(u64);

impl XorShift {
    fn below(
        &mut self,
        n: u64,
    ) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0 % n
    }
}

fn load_config() -> FileHandlerResult<FileHandlerConfig> {
    match std::env::args().nth(1) {
        Some(path) => FileHandlerConfig::read_from_path(&PathBuf::from(path)),
        None => FileHandlerConfig::locate_config_file(&std::env::current_dir()?),
    }
}

// What a game thread does: reference a bank and a media, play for a bit, release both
fn run_game_thread(
    thread_index: usize,
    engine: Arc<SimulatedEngine>,
    banks: Arc<FileStateCatalog<u32>>,
    medias: Arc<FileStateCatalog<u32>>,
) -> FileHandlerResult<()> {
    profiling::register_thread!(&format!("Game Thread {}", thread_index));
    let mut rng = XorShift(0x2545F4914F6CDD1D + thread_index as u64);
    let (done_tx, done_rx) = crossbeam_channel::unbounded();

    for request_index in 0..REQUESTS_PER_GAME_THREAD {
        profiling::scope!("game request");
        let bank_id = rng.below(BANK_COUNT as u64) as u32;
        let media_id = rng.below(MEDIA_COUNT as u64) as u32;
        let streamed = media_id % 2 == 0;
        let origin = if streamed && rng.below(2) == 0 {
            OperationOrigin::Streaming
        } else {
            OperationOrigin::Loading
        };

        let engine_clone = engine.clone();
        let bank_done_tx = done_tx.clone();
        banks.increment(
            bank_id,
            OperationOrigin::Loading,
            move || -> Box<dyn FileStateBackend> {
                Box::new(SoundBankFile {
                    bank_id,
                    engine: engine_clone,
                })
            },
            move |result| {
                let _ = bank_done_tx.send(("bank", bank_id, result));
            },
        )?;

        let engine_clone = engine.clone();
        let media_done_tx = done_tx.clone();
        medias.increment(
            media_id,
            origin,
            move || -> Box<dyn FileStateBackend> {
                Box::new(MediaFile {
                    media_id,
                    streamed,
                    engine: engine_clone,
                })
            },
            move |result| {
                let _ = media_done_tx.send(("media", media_id, result));
            },
        )?;

        for _ in 0..2 {
            match done_rx.recv_timeout(Duration::from_secs(10)) {
                Ok((kind, id, true)) => log::debug!("Game thread {}: {} {} ready", thread_index, kind, id),
                Ok((kind, id, false)) => log::warn!("Game thread {}: {} {} failed", thread_index, kind, id),
                Err(_) => log::error!("Game thread {}: request {} timed out", thread_index, request_index),
            }
        }

        std::thread::sleep(Duration::from_millis(rng.below(20)));

        banks.decrement(bank_id, OperationOrigin::Loading, || {});
        medias.decrement(media_id, origin, || {});
    }

    Ok(())
}

fn main() {
    // Setup logging
    env_logger::Builder::default()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = load_config().unwrap();
    log::info!("Using {:?}", config);

    let module = FileHandlerModule::new(config).unwrap();
    let engine = Arc::new(SimulatedEngine::new(4, 5, 20).unwrap());
    let banks = Arc::new(FileStateCatalog::<u32>::new(module.clone()));
    let medias = Arc::new(FileStateCatalog::<u32>::new(module.clone()));

    let game_threads: Vec<_> = (0..GAME_THREAD_COUNT)
        .map(|thread_index| {
            let engine = engine.clone();
            let banks = banks.clone();
            let medias = medias.clone();
            std::thread::spawn(move || run_game_thread(thread_index, engine, banks, medias))
        })
        .collect();

    // The main loop only pumps frames, which is what retries deferred unloads and closes
    let mut frame_index = 0u64;
    loop {
        let frame_start = Instant::now();
        {
            profiling::scope!("frame");
            module.end_frame();
        }

        frame_index += 1;
        if frame_index % 30 == 0 {
            let stats = module.stats().snapshot();
            log::info!(
                "Frame {}: {} banks, {} medias, {} operations in flight, {} completed (avg {:?}), {} errors, {} engine requests",
                frame_index,
                banks.len(),
                medias.len(),
                stats.operations_being_processed,
                stats.completed_operation_count,
                stats.average_operation_latency(),
                stats.total_error_count,
                engine.active_request_count()
            );
        }

        let game_threads_done = game_threads.iter().all(|x| x.is_finished());
        if game_threads_done && banks.is_empty() && medias.is_empty() {
            break;
        }

        if frame_index > 10_000 {
            log::error!("Giving up waiting for file states to be released");
            break;
        }

        profiling::finish_frame!();
        if let Some(remaining) = FRAME_DURATION.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    for game_thread in game_threads {
        if let Err(e) = game_thread.join().unwrap() {
            log::error!("Game thread failed: {}", e);
        }
    }

    let stats = module.stats().snapshot();
    log::info!(
        "Done after {} frames: {} operations completed, average latency {:?}, {} errors",
        frame_index,
        stats.completed_operation_count,
        stats.average_operation_latency(),
        stats.total_error_count
    );

    module.request_exit();
    banks.term_all();
    medias.term_all();
    drop(banks);
    drop(medias);

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.finish(),
        Err(_) => log::warn!("Sound engine is still referenced, not waiting for its threads"),
    }
}
