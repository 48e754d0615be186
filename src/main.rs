// src/main.rs - Command-line front end for the mount
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};

use sekstant::config::{self, Config};
use sekstant::sensing::AlignOutcome;
use sekstant::web::mount_channel::MountRequest;
use sekstant::{AxisId, Direction, MotionCommand, Mount};

type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Parser)]
#[command(name = "sekstant", version, about = "Dual-axis pointing mount controller")]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Use simulated hardware regardless of the configured backend
    #[arg(long, global = true)]
    simulate: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP control API until Ctrl-C
    Serve,
    /// Move one axis; negative amounts turn counter-clockwise
    Move {
        /// horizon | rotation | 0 | 1
        axis: AxisId,
        #[arg(long, allow_negative_numbers = true, conflicts_with = "revolutions", required_unless_present = "revolutions")]
        steps: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        revolutions: Option<f64>,
    },
    /// Run one axis continuously until Ctrl-C
    Jog {
        axis: AxisId,
        /// cw | ccw
        direction: Direction,
        /// Stop on its own after this many seconds
        #[arg(long, value_parser = parse_seconds)]
        seconds: Option<Duration>,
    },
    /// Print filtered horizon and rotation angles
    Level {
        #[arg(short = 'n', long, default_value_t = 10)]
        samples: usize,
    },
    /// Record the horizon angle and derive longitude from its peak
    Survey {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long, value_parser = parse_seconds)]
        duration: Option<Duration>,
        /// Write the angle history to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Run light tracking alongside the survey
        #[arg(long)]
        with_light: bool,
    },
    /// Follow the light source with the photo sensor
    Track {
        #[arg(long, value_parser = parse_seconds)]
        seconds: Option<Duration>,
    },
    /// Turn the compass axis until it points north
    AlignNorth,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("Starting sekstant {}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path)?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    let mut mount = match Mount::from_config(&config, cli.simulate) {
        Ok(mount) => mount,
        Err(e) => {
            tracing::error!("Failed to initialize mount: {}", e);
            return Err(e.into());
        }
    };

    let result = run(cli.command, &mut mount, &config).await;
    mount.shutdown().await;
    result
}

async fn run(command: Command, mount: &mut Mount, config: &Config) -> Result<(), BoxError> {
    match command {
        Command::Serve => serve(mount, config).await,
        Command::Move { axis, steps, revolutions } => {
            let command = match (steps, revolutions) {
                (Some(steps), _) => {
                    let direction = if steps < 0 {
                        Direction::CounterClockwise
                    } else {
                        Direction::Clockwise
                    };
                    MotionCommand::new(axis, direction, steps.unsigned_abs())
                }
                // clap requires one of the two
                (None, revolutions) => MotionCommand::from_revolutions(
                    axis,
                    revolutions.unwrap_or_default(),
                    config.mount.steps_per_revolution,
                )?,
            };
            mount.move_axis(command).await;
            tokio::select! {
                _ = mount.motors().wait_idle(axis) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, aborting move");
                    mount.abort(axis).await;
                }
            }
            print_position(mount, axis);
            Ok(())
        }
        Command::Jog { axis, direction, seconds } => {
            mount.motors().jog(axis, direction).await;
            wait_for_stop(seconds).await;
            mount.abort(axis).await;
            print_position(mount, axis);
            Ok(())
        }
        Command::Level { samples } => {
            let mut ticker = tokio::time::interval(Duration::from_millis(config.tracking.sample_period_ms));
            for _ in 0..samples {
                ticker.tick().await;
                match mount.sample_angles().await {
                    Ok(sample) => println!(
                        "horizon {:7.2} deg   rotation {:7.2} deg",
                        sample.horizon_deg, sample.rotation_deg
                    ),
                    Err(e) => tracing::warn!("Angle read failed: {}", e),
                }
            }
            Ok(())
        }
        Command::Survey { duration, csv, with_light } => {
            mount.start_tracking(true, with_light).await?;
            wait_for_stop(duration).await;
            match mount.stop_tracking().await {
                Some(estimate) => println!(
                    "peak {:.2} deg at {} -> longitude {:.2} deg",
                    estimate.peak_angle_deg, estimate.solar_noon_utc, estimate.longitude_deg
                ),
                None => println!("longitude unavailable: no angle was recorded"),
            }
            if let Some(path) = csv {
                mount.record().save_csv(&path)?;
            }
            Ok(())
        }
        Command::Track { seconds } => {
            mount.start_tracking(false, true).await?;
            wait_for_stop(seconds).await;
            mount.stop_tracking().await;
            for axis in AxisId::ALL {
                print_position(mount, axis);
            }
            Ok(())
        }
        Command::AlignNorth => {
            match mount.align_north().await? {
                AlignOutcome::Aligned { heading, steps } => {
                    println!("aligned: heading {:.1} deg after {} steps", heading, steps)
                }
                AlignOutcome::GaveUp { heading, steps } => println!(
                    "gave up after {} steps, last heading {}",
                    steps,
                    heading.map_or("unknown".to_string(), |h| format!("{:.1} deg", h))
                ),
            }
            Ok(())
        }
    }
}

async fn serve(mount: &mut Mount, config: &Config) -> Result<(), BoxError> {
    // Set up a channel for communication between Axum handlers and the mount.
    let (mount_tx, mount_rx) = mpsc::channel::<MountRequest>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let app = sekstant::web::api::create_router(mount_tx, mount.events().clone());
    let listener = tokio::net::TcpListener::bind(&config.api.bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received");
        }
        let _ = signal_tx.send(());
    });

    mount.serve(mount_rx, shutdown_tx.subscribe()).await;
    let _ = shutdown_tx.send(());
    server.await??;
    Ok(())
}

/// Non-negative, finite seconds.
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("'{value}' is not a number: {e}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("'{value}' is not a usable duration: {e}"))
}

/// Wait for Ctrl-C, or until `limit` has passed when given.
async fn wait_for_stop(limit: Option<Duration>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received"),
        _ = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        } => {}
    }
}

fn print_position(mount: &Mount, axis: AxisId) {
    let motors = mount.motors();
    println!(
        "{}: {} steps ({:.1} deg)",
        axis,
        motors.position(axis),
        motors.degrees(axis)
    );
}
