use std::{ io::BufRead, path::PathBuf, sync::Arc, time::Duration };

use anyhow::Context;
use crossbeam_channel::{ Receiver, TryRecvError };
use queueplay_core::{
    Backend,
    Command,
    Player,
    PlayerConfig,
    PlayerHandle,
    PlayerItem,
    RepeatMode,
    loader::LocalFileResolver,
    sim::{ SimulatedEngineFactory, SimulatedSession },
};
use strum::IntoEnumIterator;

mod console;
mod library;
mod logger;

use console::ConsoleTransport;

/// One line of user input.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Run(Command),
    Shuffle,
    Repeat,
    Rate(f32),
    Status,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Err("empty input".to_string());
    };
    let arg = words.next();

    let input = match word {
        "play" | "p" => Input::Run(Command::Play),
        "pause" => Input::Run(Command::Pause),
        "next" | "n" => Input::Run(Command::Next),
        "prev" | "previous" => Input::Run(Command::Previous),
        "stop" => Input::Run(Command::Stop),
        "prefetch" => Input::Run(Command::Prefetch),
        "at" => {
            let index: usize = arg
                .ok_or("usage: at <index>")?
                .parse()
                .map_err(|e| format!("bad index: {}", e))?;
            Input::Run(Command::PlayAt(index))
        }
        "seek" => {
            let seconds: f64 = arg
                .ok_or("usage: seek <seconds>")?
                .parse()
                .map_err(|e| format!("bad position: {}", e))?;
            Input::Run(Command::Seek { seconds, should_play: true })
        }
        "rate" => {
            let rate: f32 = arg
                .ok_or("usage: rate <multiplier>")?
                .parse()
                .map_err(|e| format!("bad rate: {}", e))?;
            Input::Rate(rate)
        }
        "shuffle" => Input::Shuffle,
        "repeat" => Input::Repeat,
        "status" | "s" => Input::Status,
        "help" | "h" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => {
            return Err(format!("unknown command '{}', type 'help'", other));
        }
    };
    Ok(input)
}

fn print_help() {
    println!("Commands:");
    println!("  play | pause | next | prev | stop | prefetch");
    println!("  at <index>       play the item at <index>");
    println!("  seek <seconds>   jump within the current item");
    println!("  rate <x>         set the playback rate");
    println!("  shuffle          toggle shuffle");
    let modes: Vec<String> = RepeatMode::iter().map(|m| m.to_string()).collect();
    println!("  repeat           cycle repeat mode ({})", modes.join(" / "));
    println!("  status | help | quit");
}

fn print_status(handle: &PlayerHandle) {
    let state = handle.snapshot();
    println!(
        "{} | #{} of {} | {} / {} | shuffle {} | repeat {} | rate {}",
        state.status,
        state.play_index,
        state.queue.len(),
        handle.current_item_time_display().get(),
        handle.current_item_duration_display().get(),
        state.shuffle_mode,
        state.repeat_mode,
        state.desired_rate
    );
}

struct Args {
    config: Option<PathBuf>,
    paths: Vec<String>,
}

fn parse_args(args: Vec<String>) -> anyhow::Result<Args> {
    let mut config = None;
    let mut paths = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = Some(PathBuf::from(args.next().context("--config needs a file")?));
        } else {
            paths.push(arg);
        }
    }
    Ok(Args { config, paths })
}

/// Read stdin on its own thread; lines arrive over the returned channel.
fn spawn_input_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::setup_logging()?;
    log::info!("Starting queueplay");

    let args = parse_args(std::env::args().skip(1).collect())?;
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };

    let urls = library::expand(&args.paths);
    log::info!("Adding {} items to the queue from CLI", urls.len());
    let items = urls.into_iter().map(PlayerItem::new).collect();

    let backend = Backend {
        resolver: Arc::new(LocalFileResolver::new()),
        engines: Arc::new(SimulatedEngineFactory::new(config.progress_interval())),
        session: Arc::new(SimulatedSession::new()),
        transport: Some(Arc::new(ConsoleTransport::new())),
    };
    let (player, handle) = Player::new(items, config, backend)?;
    let player_task = player.spawn();

    let mut statuses = handle.status();
    tokio::spawn(async move {
        while let Some(status) = statuses.next().await {
            println!("status: {}", status);
        }
    });

    print_help();
    let input = spawn_input_reader();
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    'main: loop {
        ticker.tick().await;

        loop {
            let line = match input.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'main,
            };
            if line.trim().is_empty() {
                continue;
            }

            match parse_input(&line) {
                Ok(Input::Run(cmd)) => handle.send(cmd)?,
                Ok(Input::Shuffle) => {
                    let mode = handle.snapshot().shuffle_mode.toggled();
                    handle.set_shuffle_mode(mode)?;
                }
                Ok(Input::Repeat) => {
                    let mode = handle.snapshot().repeat_mode.cycled();
                    handle.set_repeat_mode(mode)?;
                }
                Ok(Input::Rate(rate)) => handle.set_desired_rate(rate)?,
                Ok(Input::Status) => print_status(&handle),
                Ok(Input::Help) => print_help(),
                Ok(Input::Quit) => break 'main,
                Err(message) => println!("{}", message),
            }
        }
    }

    handle.shutdown();
    player_task.await?;
    log::info!("Bye");
    Ok(())
}
