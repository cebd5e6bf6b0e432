use alarm_gate::config::Config;
use alarm_gate::consts;
use alarm_gate::controller::Controller;
use alarm_gate::homeassistant::{self, HomeAssistant, Incoming};
use alarm_gate::io::{self, DigitalIo};
use clap::Parser;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "config.yaml")]
    config_path: String,

    // USB connection to the IO board
    #[arg(long, default_value = "/dev/ttyACM0")]
    port_name: String,
    #[arg(long, default_value_t = 115200)]
    baud_rate: u32,

    // MQTT connection
    #[arg(long)]
    mqtt_host: String,
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,
    #[arg(long, default_value = "")]
    mqtt_username: String,
    #[arg(long, default_value = "")]
    mqtt_password: String,
    #[arg(long, default_value = "alarm-gate")]
    client_id: String,
}

fn init_log() {
    let timer = fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string());

    // Configure a custom event formatter
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_source_location(true)
        .with_timer(timer)
        .compact();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env()
        .expect("RUST_LOG configuration is valid")
        .add_directive("rumqttc=info".parse().unwrap());

    fmt().event_format(format).with_env_filter(filter).init();
}

/// Wait a bounded time for the broker. Events that arrive meanwhile are
/// handled normally; on timeout we continue without publication.
async fn wait_for_broker<IO: DigitalIo>(
    controller: &mut Controller<IO>,
    ha: &HomeAssistant,
) -> anyhow::Result<()> {
    let wait = async {
        while let Some(msg) = ha.recv().await {
            let connected = msg == Incoming::Connected;
            ha.send_all(controller.handle(msg))?;
            if connected {
                return Ok(());
            }
        }
        Err::<(), anyhow::Error>(anyhow::anyhow!("MQTT receiver finished"))
    };

    match time::timeout(consts::MQTT_STARTUP_WAIT, wait).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "No MQTT connection after {:?}; running degraded until it connects",
                consts::MQTT_STARTUP_WAIT
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log();
    let args = Args::parse();

    let config = Config::from_file(&args.config_path)?;
    config.validate(consts::INPUT_COUNT)?;
    info!("Starting alarm gate. Args: {:?} Config: {:?}", args, config);

    let io = io::run(args.port_name.clone(), args.baud_rate).await?;
    let mut controller = Controller::new(&config, io);

    let ha = homeassistant::Initiator::new(
        &args.client_id,
        &args.mqtt_host,
        args.mqtt_port,
        &args.mqtt_username,
        &args.mqtt_password,
        &controller.last_will_topic(),
    )
    .start();

    wait_for_broker(&mut controller, &ha).await?;

    info!("alarm-gate initialized.");

    let mut ticker = time::interval(config.timing.poll());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let out = tokio::select! {
            _ = ticker.tick() => controller.poll(Instant::now()),
            msg = ha.recv() => match msg {
                Some(msg) => controller.handle(msg),
                None => {
                    // The other end died.
                    break;
                }
            },
        };
        ha.send_all(out)?;

        if controller.io().reader.is_finished() || controller.io().writer.is_finished() {
            anyhow::bail!("IO board connection finished");
        }
    }

    info!("MQTT receiver finished, quitting");
    Ok(())
}
