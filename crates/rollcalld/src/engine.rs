use crate::config::Config;
use crate::console::LineConsole;
use crate::overlay::LogOverlay;
use rollcall_core::{
    DirectoryGallery, EnrollmentGate, FrameMatchProcessor, RunSummary, Session, SignatureStore,
    SqliteLedger,
};
use rollcall_hw::Camera;
use rollcall_vision::OnnxFaceCapability;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("vision error: {0}")]
    Vision(#[from] rollcall_vision::VisionError),
    #[error("ledger error: {0}")]
    Ledger(#[from] rollcall_core::LedgerError),
    #[error("enrollment images: {0}")]
    Gallery(#[from] rollcall_core::GalleryError),
    #[error("signature store: {0}")]
    Store(#[from] rollcall_core::StoreError),
    #[error("run aborted: {0}")]
    Run(#[from] rollcall_core::RunError),
}

type Processor = FrameMatchProcessor<OnnxFaceCapability, SqliteLedger>;

/// Prepare the processor for `session` and spawn the run loop on a
/// dedicated OS thread.
///
/// Models, database and enrollment images are loaded before spawning so
/// startup fails fast. The camera is opened on the engine thread, which owns
/// it until the run ends.
pub fn spawn_engine(
    config: &Config,
    session: &Session,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<RunSummary, EngineError>>, EngineError> {
    let mut processor = build_processor(config, session)?;

    let device = config.camera_device.clone();
    let (width, height) = (config.camera_width, config.camera_height);
    let attempts = config.auth_attempts;

    let handle = std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || -> Result<RunSummary, EngineError> {
            let mut camera = Camera::open(&device, width, height)?;
            tracing::info!(device = %device, width = camera.width, height = camera.height, "camera opened");

            let mut console = LineConsole::stdin(attempts);
            console_banner();
            let summary = rollcall_core::run(
                &mut processor,
                &mut camera,
                &mut LogOverlay,
                &mut console,
                &stop,
            )?;
            tracing::info!("engine thread exiting");
            Ok(summary)
        })
        .expect("failed to spawn engine thread");

    Ok(handle)
}

fn build_processor(config: &Config, session: &Session) -> Result<Processor, EngineError> {
    let mut capability = OnnxFaceCapability::load(&config.model_dir)?;
    let ledger = SqliteLedger::open(&config.db_path)?;

    let gallery = DirectoryGallery::for_roster(&config.gallery_root, session)?;
    tracing::info!(path = %gallery.root().display(), "enrollment images");

    let mut store = SignatureStore::with_policy(config.match_policy);
    let report = store.load(&gallery, &mut capability)?;
    for skipped in &report.skipped {
        tracing::warn!(identity = %skipped.identity, reason = %skipped.reason, "not enrolled");
    }

    if config.admin_secret.is_none() {
        tracing::warn!("ROLLCALL_ADMIN_SECRET is not set; enrollment is disabled");
    }
    let gate = EnrollmentGate::new(config.admin_secret.clone(), Box::new(gallery))
        .with_max_attempts(config.auth_attempts);

    let processor = FrameMatchProcessor::new(session.key(), capability, store, ledger, gate)?
        .with_tolerance(config.tolerance)
        .with_detect_scale(config.detect_scale);
    Ok(processor)
}

fn console_banner() {
    eprintln!("rollcall running: 'n' + Enter enrolls an unknown face, 'q' + Enter stops");
}
