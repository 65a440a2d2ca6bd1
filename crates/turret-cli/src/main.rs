use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use turret_control::doctor as control_doctor;
use turret_control::patrol::run_patrol_loop;
use turret_control::runner::run_targeting_loop;
use turret_control::sched::{self, SchedConfig};
use turret_control::{
    ElevationTable, Faction, FiringConfig, GimbalDriver, PatrolConfig, SharedState, Targeter, TargetingConfig,
};
use turret_gimbal::autodetect::probe_links;
use turret_gimbal::loopback::Loopback;
use turret_gimbal::{candidate_links, doctor as gimbal_doctor, Connector, GimbalConfig, GimbalController, SerialConnector};
use turret_vision::FeedConfig;

#[derive(Debug, Parser)]
#[command(name = "turret", version, about = "turret - gimbal targeting and actuation")]
struct Cli {
    #[arg(long)]
    config: String,

    /// Also append log output to this file.
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    Run {
        /// Overrides targeting.faction (red | blue).
        #[arg(long)]
        faction: Option<String>,
    },
    Gimbal {
        #[command(subcommand)]
        cmd: GimbalCmd,
    },
}

#[derive(Debug, Subcommand)]
enum GimbalCmd {
    /// Probe candidate ports for gimbal status frames.
    Probe,
    /// Connect, wait for telemetry, print it.
    Status {
        #[arg(long, default_value_t = 500)]
        wait_ms: u64,
    },
    /// Send a single pitch/yaw set-point (trigger held off).
    Aim {
        #[arg(long, allow_hyphen_values = true)]
        pitch: i32,
        #[arg(long, allow_hyphen_values = true)]
        yaw: i32,
        #[arg(long, default_value_t = 300)]
        wait_ms: u64,
    },
    /// Send one transparent-CAN frame, e.g. `--id 7FF --data "01 02"`.
    Raw {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        data: String,
        #[arg(long, default_value_t = 300)]
        wait_ms: u64,
    },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    gimbal: GimbalConfig,
    patrol: PatrolConfig,
    targeting: TargetingConfig,
    firing: FiringConfig,
    feed: FeedConfig,
    /// Class name -> pitch, layered over the built-in table.
    elevation: BTreeMap<String, i32>,
    sched: SchedConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Mutex::new(file)))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Run { faction } => run(cfg, faction).await?,
        Command::Gimbal { cmd } => gimbal_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn make_connector(cfg: &GimbalConfig) -> Box<dyn Connector> {
    if cfg.dry_run {
        info!("gimbal: dry run, using in-memory bridge");
        Box::new(Loopback::new().echo_status(true))
    } else {
        Box::new(SerialConnector::new(Duration::from_millis(cfg.port_timeout_ms)))
    }
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    gimbal_doctor::check_gimbal(&cfg.gimbal)?;
    control_doctor::check_patrol(&cfg.patrol)?;
    control_doctor::check_targeting(&cfg.targeting)?;
    control_doctor::check_firing(&cfg.firing)?;
    control_doctor::check_elevation(&ElevationTable::with_overrides(&cfg.elevation))?;

    if cfg.feed.kind == "replay" && !std::path::Path::new(&cfg.feed.path).exists() {
        warn!("doctor: replay log {} not found", cfg.feed.path);
    }
    if cfg.gimbal.dry_run {
        warn!("doctor: gimbal.dry_run=true, no hardware will be driven");
    }

    info!("doctor: OK");
    Ok(())
}

async fn gimbal_cmd(cfg: &Config, cmd: GimbalCmd) -> Result<()> {
    let gcfg = &cfg.gimbal;
    let connector = make_connector(gcfg);

    match cmd {
        GimbalCmd::Probe => {
            let report = probe_links(
                connector.as_ref(),
                &candidate_links(gcfg),
                Duration::from_millis(gcfg.probe_timeout_ms),
                gcfg.can_rate_index,
            );
            match &report.chosen {
                Some((dev, baud)) => println!("CHOSEN: {} @ {}", dev, baud),
                None => println!("CHOSEN: none"),
            }
            for p in &report.probes {
                println!(
                    "probe dev={} baud={} status={} {}ms note={}",
                    p.dev, p.baud, p.telemetry_seen, p.elapsed_ms, p.note
                );
            }
            Ok(())
        }
        GimbalCmd::Status { wait_ms } => {
            let g = GimbalController::new(gcfg.clone());
            g.initialize(connector.as_ref()).context("gimbal initialize")?;
            std::thread::sleep(Duration::from_millis(wait_ms));
            print_gimbal(&g);
            g.close();
            Ok(())
        }
        GimbalCmd::Aim { pitch, yaw, wait_ms } => {
            let g = GimbalController::new(gcfg.clone());
            g.initialize(connector.as_ref()).context("gimbal initialize")?;
            g.set_pitch(pitch).context("set pitch")?;
            g.set_yaw(yaw).context("set yaw")?;
            std::thread::sleep(Duration::from_millis(wait_ms));
            print_gimbal(&g);
            g.close();
            Ok(())
        }
        GimbalCmd::Raw { id, data, wait_ms } => {
            let frame = turret_proto::encode_transparent(&id, &data).context("build transparent frame")?;
            let g = GimbalController::new(gcfg.clone());
            g.initialize(connector.as_ref()).context("gimbal initialize")?;
            g.send_raw(&frame).context("send raw frame")?;
            println!("sent={}", hex::encode_upper(&frame));
            std::thread::sleep(Duration::from_millis(wait_ms));
            print_gimbal(&g);
            g.close();
            Ok(())
        }
    }
}

fn print_gimbal(g: &GimbalController) {
    let link = g.link_status();
    let cmd = g.commanded();
    let st = g.status_snapshot();
    println!("link={}", link.describe());
    println!("frames_sent={} send_failures={} status_frames={}", link.frames_sent, link.send_failures, link.status_frames);
    println!("commanded pitch={} yaw={} shoot={} idle={}", cmd.pitch, cmd.yaw, cmd.shoot, cmd.idle);
    println!("telemetry pic={} yaw={} shoot={} idle={}", st.pic, st.yaw, st.shoot, st.idle);
    if let Some(aux) = g.aux_snapshot() {
        println!("aux d1={} d2={} d3={} d4={}", aux.d1, aux.d2, aux.d3, aux.d4);
    }
}

async fn run(cfg: Config, faction: Option<String>) -> Result<()> {
    let mut tcfg = cfg.targeting.clone();
    if let Some(f) = faction {
        tcfg.faction = f.parse::<Faction>()?;
    }
    info!("run: starting, faction {}", tcfg.faction);

    let elevation = ElevationTable::with_overrides(&cfg.elevation);
    control_doctor::check_elevation(&elevation)?;
    let (source, detector) = turret_vision::open_feed(&cfg.feed).context("open detection feed")?;

    let gimbal = Arc::new(GimbalController::new(cfg.gimbal.clone()));
    let connector = make_connector(&cfg.gimbal);
    gimbal.initialize(connector.as_ref()).context("gimbal initialize")?;

    let shared = SharedState::new(cfg.patrol.center);

    let patrol_handle = {
        let shared = shared.clone();
        let driver: Arc<dyn GimbalDriver> = gimbal.clone();
        let pcfg = cfg.patrol.clone();
        tokio::task::spawn_blocking(move || run_patrol_loop(shared, driver, pcfg))
    };

    let target_handle = {
        let shared = shared.clone();
        let driver: Arc<dyn GimbalDriver> = gimbal.clone();
        let targeter = Targeter::new(tcfg, cfg.firing.clone(), elevation);
        let sched_cfg = cfg.sched.clone();
        tokio::task::spawn_blocking(move || {
            sched::apply_current_thread(&sched_cfg);
            run_targeting_loop(shared, driver, source, detector, targeter)
        })
    };

    let mut report = tokio::time::interval(Duration::from_secs(10));
    report.tick().await;
    loop {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("wait for ctrl-c")?;
                info!("run: shutdown requested");
                break;
            }
            _ = report.tick() => {
                let st = shared.snapshot();
                let link = gimbal.link_status();
                debug!(
                    "run: locked={} shooting={} yaw={} frames_sent={} status_frames={}",
                    st.locked, st.shooting, st.current_yaw, link.frames_sent, link.status_frames
                );
            }
        }
    }

    shared.stop();
    if let Err(e) = patrol_handle.await {
        warn!("run: patrol worker ended abnormally: {}", e);
    }
    if let Err(e) = target_handle.await {
        warn!("run: targeting worker ended abnormally: {}", e);
    }

    gimbal.close();
    let link = gimbal.link_status();
    info!(
        "run: done, {} frames sent, {} send failures, {} status frames",
        link.frames_sent, link.send_failures, link.status_frames
    );
    Ok(())
}
