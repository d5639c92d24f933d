use anyhow::Context;
use remote_drive_controller::application::display::{
    EventChannelPump, NullVisualization, Offsets,
};
use remote_drive_controller::application::{ControlLoop, DriverContext};
use remote_drive_controller::domain::controller::InputSampler;
use remote_drive_controller::domain::settings::SettingsService;
use remote_drive_controller::infrastructure::input_backend::create_backend;
use remote_drive_controller::infrastructure::link::connection::create_connector;
use remote_drive_controller::infrastructure::link::protocol::FrameCodec;
use remote_drive_controller::infrastructure::link::scanner::{
    KnownDeviceDiscovery, PreferredDeviceChooser,
};
use remote_drive_controller::infrastructure::link::service::SessionConfig;
use remote_drive_controller::infrastructure::link::TransportSession;
use remote_drive_controller::infrastructure::logging;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().context("Failed to load settings")?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Remote Drive Controller");
    info!("Settings file: {:?}", settings_service.path());

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut session = TransportSession::new(
        SessionConfig::from(&settings.transport),
        create_connector(&settings.transport),
        event_tx,
    );

    let mut discovery = KnownDeviceDiscovery::new(settings.transport.known_devices.clone());
    let mut chooser = PreferredDeviceChooser::new(settings.transport.preferred_device.clone());
    match session.establish(&mut discovery, &mut chooser).await {
        Ok(device) => info!("Link up with {} ({})", device.name, device.id),
        // commands are still sampled and dropped until the next run
        Err(e) => warn!("Running without a link: {}. Restart to try again.", e),
    }

    let context = DriverContext {
        session,
        sampler: InputSampler::new(settings.input.clone()),
        backend: create_backend(settings.input.prefer_gamepad),
        codec: FrameCodec::new(settings.transport.max_payload),
        offsets: Offsets::default(),
    };

    let mut driver = ControlLoop::new(
        context,
        EventChannelPump::new(event_rx),
        NullVisualization,
        settings.driver.tick_interval(),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    driver.run(shutdown).await;
    Ok(())
}
