//! A headless command-line smoke-test runner for the `chip8_dynarec` crate.
//!
//! Not a presenter: there is no window, no audio, no keyboard input. It runs
//! a ROM for a fixed number of frames and prints the resulting display as
//! ASCII art, which is enough to eyeball a ROM's output (the IBM logo test
//! ROM, for instance) without pulling in a windowing dependency this crate's
//! core does not need.
//!
//! Usage: `chip8-dynarec-demo <rom path> [--tier interpreter|cached|recompiler] [--speed hz] [--frames n]`

use chip8_dynarec::{CoreState, Executor, Options, Tier};
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let config = match parse_args(&args[1..]) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("usage: {} <rom path> [--tier interpreter|cached|recompiler] [--speed hz] [--frames n]", args[0]);
            return ExitCode::FAILURE;
        }
    };

    let options = Options {
        speed: config.speed,
        rom_path: config.rom_path,
        ..Options::default()
    };

    let (mut executor, mut core) = match Executor::init(config.tier, &options) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("fatal startup error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let quota_per_frame = (options.speed / 60).max(1);
    for _ in 0..config.frames {
        let mut cycles_this_frame = 0;
        while cycles_this_frame < quota_per_frame {
            match executor.step(&mut core) {
                Ok(cycles) => cycles_this_frame += cycles,
                Err(e) => {
                    eprintln!("fatal runtime error: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        executor.tick_timers(&mut core);
    }

    print_display(&core);

    if let Err(e) = executor.shutdown() {
        tracing::warn!(error = %e, "failed to dump code cache on shutdown");
    }

    ExitCode::SUCCESS
}

struct Config {
    rom_path: std::path::PathBuf,
    tier: Tier,
    speed: u32,
    frames: u32,
}

fn parse_args(args: &[String]) -> Result<Config, String> {
    let mut rom_path = None;
    let mut tier = Tier::Recompiler;
    let mut speed = Options::default().speed;
    let mut frames = 60u32;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--tier" => {
                let value = iter.next().ok_or("--tier requires a value")?;
                tier = match value.as_str() {
                    "interpreter" => Tier::Interpreter,
                    "cached" => Tier::CachedInterpreter,
                    "recompiler" => Tier::Recompiler,
                    other => return Err(format!("unknown tier '{other}'")),
                };
            }
            "--speed" => {
                let value = iter.next().ok_or("--speed requires a value")?;
                speed = value.parse().map_err(|_| "--speed must be a number")?;
            }
            "--frames" => {
                let value = iter.next().ok_or("--frames requires a value")?;
                frames = value.parse().map_err(|_| "--frames must be a number")?;
            }
            path if rom_path.is_none() => rom_path = Some(std::path::PathBuf::from(path)),
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }

    Ok(Config {
        rom_path: rom_path.ok_or("missing ROM path")?,
        tier,
        speed,
        frames,
    })
}

/// Renders `core.display` to stdout as `#`/`.` ASCII art - the 64x32
/// monochrome framebuffer the real presenter would expand to RGBA and scale
/// into a window.
fn print_display(core: &CoreState) {
    for &row in core.display.iter() {
        let mut line = String::with_capacity(64);
        for col in 0..64 {
            let bit = (row >> (63 - col)) & 1;
            line.push(if bit == 1 { '#' } else { '.' });
        }
        println!("{line}");
    }
}
