//! CLI entry point: loads settings, brings up the DAQ backend and control
//! loop, and (if configured) the TCP command surface, then runs the
//! engine domain on this thread until the DAQ signals it is done.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use feedback_lockin::averager::AveragingMode;
use feedback_lockin::config::Settings;
use feedback_lockin::control_plane::ControlPlane;
use feedback_lockin::daq::simulation::SimulationDaq;
use feedback_lockin::daq::{ChannelSpec, ClockConfig, DaqPort};
use feedback_lockin::engine::FeedbackEngine;
use feedback_lockin::tcp;

#[derive(Parser)]
#[command(name = "feedback-lockin", about = "Multi-channel feedback lock-in amplifier control loop")]
struct Cli {
    /// Settings file to load.
    #[arg(short = 's', long = "settings", default_value = "dev.ini")]
    settings: PathBuf,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("feedback-lockin {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    env_logger::init();

    let exit_code = match run(&cli.settings) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(settings_path: &std::path::Path) -> anyhow::Result<()> {
    let settings = Settings::load(settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;

    let mut engine = FeedbackEngine::new(settings.daq.channels, settings.fbl.points);
    engine.set_ki(settings.fbl.ki);
    engine.set_kp(settings.fbl.kp);
    let avg_mode = if settings.fbl.averaging <= 1.0 { AveragingMode::None } else { AveragingMode::Sliding };
    engine.set_averaging(avg_mode, settings.fbl.averaging);

    let mut daq: Box<dyn DaqPort> = if settings.daq.dummy {
        Box::new(SimulationDaq::new(settings.daq.channels, settings.fbl.points, settings.fbl.frequency))
    } else {
        anyhow::bail!(
            "hardware DAQ backend requires vendor driver bindings not shipped in this build; set DAQ/dummy=true"
        );
    };
    daq.set_channels(ChannelSpec {
        input_channels: settings.daq.input_channels.clone(),
        output_channels: settings.daq.output_channels.clone(),
    });
    daq.set_clocks(ClockConfig {
        output_clock: settings.daq.output_clock.clone(),
        output_clock_channel: settings.daq.output_clock_channel.clone(),
        input_clock_channel: settings.daq.input_clock_channel.clone(),
    });
    daq.set_frequency(settings.fbl.frequency);
    daq.init().context("DAQ initialization failed")?;
    daq.start().context("DAQ start failed")?;

    let control_plane = ControlPlane::new();
    let control_handle = control_plane.handle();

    let _tcp_runtime = if settings.tcp.enabled {
        let rt = tokio::runtime::Runtime::new().context("starting TCP runtime")?;
        let handle = control_handle.clone();
        let channels = settings.daq.channels;
        let port = settings.tcp.port;
        rt.spawn(async move {
            if let Err(e) = tcp::serve(port, handle, channels).await {
                log::error!("TCP server error: {e}");
            }
        });
        Some(rt)
    } else {
        log::info!("TCP control surface disabled");
        None
    };

    let data_ready = daq.data_ready();
    loop {
        match data_ready.recv() {
            Ok(()) => {
                control_plane.drain_and_apply(&mut engine);
                let in_block = daq.get_input();
                engine.step(&in_block);
                let out = engine.sine_out();
                daq.set_output(&out);
            }
            Err(_) => break,
        }
    }

    daq.stop();
    Ok(())
}
