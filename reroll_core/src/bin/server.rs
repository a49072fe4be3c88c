use std::collections::HashMap;
use std::io::{self, BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use bevy::prelude::{App, Entity};
use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use reroll_core::log_stream::start_log_stream_server;
use reroll_core::{
    build_region_app, load_catalog_from_env, load_pipeline_config_from_env, run_tick,
    AgentDisconnected, DispatchError, MemoryWorld, PipelineMetrics, RegionAppSetup,
    TrackedAgent, WorldAccessError, WorldStore,
};
use reroll_schema::{AgentId, CellTypeId, ParticipationState, RegionKey, VerticalBounds};

const WORLD_BOUNDS: VerticalBounds = VerticalBounds::new(0, 128);
const SEED_RADIUS: i32 = 2;
const SURFACE_Y: i32 = 64;

#[derive(Debug, Error)]
enum ServerError {
    #[error("failed to bind command listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to seed world: {0}")]
    Seed(#[from] WorldAccessError),
}

fn main() {
    if let Err(err) = run() {
        error!(target: "reroll::server", error = %err, "server.exit=failed");
        eprintln!("reroll server failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ServerError> {
    let config = load_pipeline_config_from_env();

    let log_stream = match start_log_stream_server(config.log_bind()) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!(
                "Log stream server bind failed at {}: {}. Log streaming disabled.",
                config.log_bind(),
                err
            );
            None
        }
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(log_stream.as_ref().map(|handle| handle.layer()))
        .init();

    let (catalog, catalog_path) = load_catalog_from_env();
    let mut world = MemoryWorld::new(config.region_size(), WORLD_BOUNDS);
    for rx in -SEED_RADIUS..=SEED_RADIUS {
        for rz in -SEED_RADIUS..=SEED_RADIUS {
            seed_region(&mut world, RegionKey::new(rx, rz))?;
        }
    }

    let mut app = build_region_app(
        RegionAppSetup::new(world)
            .with_catalog(catalog)
            .with_config(config.clone()),
    )?;
    let command_rx = spawn_command_listener(config.command_bind())?;

    info!(
        target: "reroll::server",
        command_bind = %config.command_bind(),
        log_bind = %config.log_bind(),
        region_size = config.region_size(),
        workers = config.worker_count(),
        catalog = catalog_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "builtin".to_string()),
        "Region reroll server ready"
    );

    let mut agents: HashMap<AgentId, Entity> = HashMap::new();
    while let Ok(command) = command_rx.recv() {
        match command {
            Command::Join { agent, x, z } => {
                if agents.contains_key(&agent) {
                    warn!(target: "reroll::server", %agent, "command.rejected=already_joined");
                    continue;
                }
                let entity = app.world.spawn(TrackedAgent::new(agent, x, z)).id();
                agents.insert(agent, entity);
                info!(target: "reroll::server", %agent, x, z, "command.applied=join");
            }
            Command::Move { agent, x, z } => {
                if let Some(mut tracked) = tracked_agent(&mut app, &agents, agent) {
                    tracked.move_to(x, z);
                }
            }
            Command::Mode { agent, state } => {
                if let Some(mut tracked) = tracked_agent(&mut app, &agents, agent) {
                    tracked.participation = state;
                    info!(
                        target: "reroll::server",
                        %agent,
                        state = state.as_str(),
                        "command.applied=mode"
                    );
                }
            }
            Command::Leave { agent } => {
                let Some(entity) = agents.remove(&agent) else {
                    warn!(target: "reroll::server", %agent, "command.rejected=unknown_agent");
                    continue;
                };
                app.world.despawn(entity);
                app.world.send_event(AgentDisconnected(agent));
                info!(target: "reroll::server", %agent, "command.applied=leave");
            }
            Command::Load { region } => {
                let result = app
                    .world
                    .resource_mut::<WorldStore>()
                    .downcast_mut::<MemoryWorld>()
                    .map(|world| seed_region(world, region));
                match result {
                    Some(Ok(())) => {
                        info!(target: "reroll::server", %region, "command.applied=load")
                    }
                    Some(Err(err)) => {
                        warn!(target: "reroll::server", %region, error = %err, "command.failed=load")
                    }
                    None => warn!(target: "reroll::server", "command.rejected=foreign_world"),
                }
            }
            Command::Tick(ticks) => {
                for _ in 0..ticks {
                    run_tick(&mut app);
                }
                let metrics = app.world.resource::<PipelineMetrics>();
                info!(
                    target: "reroll::server",
                    tick = metrics.tick,
                    regions_triggered = metrics.regions_triggered,
                    tasks_applied = metrics.tasks_applied,
                    tasks_failed = metrics.tasks_failed,
                    cells_replaced = metrics.cells_replaced,
                    backlog = metrics.apply_backlog,
                    jobs_in_flight = metrics.jobs_in_flight,
                    "tick.completed"
                );
            }
        }
    }

    Ok(())
}

fn tracked_agent<'a>(
    app: &'a mut App,
    agents: &HashMap<AgentId, Entity>,
    agent: AgentId,
) -> Option<bevy::prelude::Mut<'a, TrackedAgent>> {
    let Some(&entity) = agents.get(&agent) else {
        warn!(target: "reroll::server", %agent, "command.rejected=unknown_agent");
        return None;
    };
    app.world.get_mut::<TrackedAgent>(entity)
}

/// Bedrock floor, stone up to the surface, a dirt and grass crust, air above.
fn seed_region(world: &mut MemoryWorld, region: RegionKey) -> Result<(), WorldAccessError> {
    world.load_region(region, &CellTypeId::new("base", "air"))?;
    world.fill_layer(region, WORLD_BOUNDS.bottom, &CellTypeId::new("base", "bedrock"))?;
    let stone = CellTypeId::new("base", "stone");
    for y in WORLD_BOUNDS.bottom + 1..SURFACE_Y - 3 {
        world.fill_layer(region, y, &stone)?;
    }
    let dirt = CellTypeId::new("base", "dirt");
    for y in SURFACE_Y - 3..SURFACE_Y {
        world.fill_layer(region, y, &dirt)?;
    }
    world.fill_layer(region, SURFACE_Y, &CellTypeId::new("base", "grass_block"))
}

#[derive(Debug, PartialEq)]
enum Command {
    Join { agent: AgentId, x: f64, z: f64 },
    Move { agent: AgentId, x: f64, z: f64 },
    Mode { agent: AgentId, state: ParticipationState },
    Leave { agent: AgentId },
    Load { region: RegionKey },
    Tick(u32),
}

fn spawn_command_listener(bind_addr: SocketAddr) -> Result<Receiver<Command>, ServerError> {
    let bind_error = |source| ServerError::Bind {
        addr: bind_addr,
        source,
    };
    let listener = TcpListener::bind(bind_addr).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;

    let (sender, receiver) = unbounded::<Command>();
    thread::Builder::new()
        .name("command-listener".to_string())
        .spawn(move || accept_clients(listener, sender))
        .map_err(bind_error)?;

    Ok(receiver)
}

fn accept_clients(listener: TcpListener, sender: Sender<Command>) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(target: "reroll::server", %addr, "command.client_connected");
                let sender = sender.clone();
                let spawned = thread::Builder::new()
                    .name(format!("command-client-{addr}"))
                    .spawn(move || handle_client(stream, sender));
                if let Err(err) = spawned {
                    warn!(target: "reroll::server", %addr, error = %err, "command.client_rejected");
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                warn!(target: "reroll::server", error = %err, "command.accept_failed");
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

fn handle_client(stream: TcpStream, sender: Sender<Command>) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(target: "reroll::server", error = %err, "command.client_setup_failed");
        return;
    }
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(command) => {
                        if sender.send(command).is_err() {
                            break;
                        }
                    }
                    None => warn!(target: "reroll::server", input = trimmed, "command.invalid"),
                }
            }
            Err(err) => {
                warn!(target: "reroll::server", error = %err, "command.read_failed");
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    let command = match parts.next()? {
        "join" => Command::Join {
            agent: AgentId(parts.next()?.parse().ok()?),
            x: parts.next()?.parse().ok()?,
            z: parts.next()?.parse().ok()?,
        },
        "move" => Command::Move {
            agent: AgentId(parts.next()?.parse().ok()?),
            x: parts.next()?.parse().ok()?,
            z: parts.next()?.parse().ok()?,
        },
        "mode" => Command::Mode {
            agent: AgentId(parts.next()?.parse().ok()?),
            state: parts.next()?.parse().ok()?,
        },
        "leave" => Command::Leave {
            agent: AgentId(parts.next()?.parse().ok()?),
        },
        "load" => Command::Load {
            region: RegionKey::new(parts.next()?.parse().ok()?, parts.next()?.parse().ok()?),
        },
        "tick" => Command::Tick(parts.next().unwrap_or("1").parse().ok()?),
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(command)
}
