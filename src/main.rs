use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use octavo::output::{Output, Terminal};
use octavo::{fault_report, Assembly, Instr, SimConfig, Simulator};

/// Octavo assembles and steps programs for a small 8-bit CPU with 16-bit instruction words.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or binary `.bin` file directly and output to terminal
    Run {
        /// `.asm` or `.bin` file to run
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
        /// Print the final machine state as JSON
        #[arg(long, conflicts_with = "trace")]
        json: bool,
        /// Print one line per executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the screen every time the program commits the buffer
        #[arg(short, long)]
        frames: bool,
        /// Byte returned when the program reads the controller
        #[arg(short, long, default_value_t = 0)]
        controller: u8,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Create binary `.bin` file to run later
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output .bin file
        dest: Option<PathBuf>,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
        /// Print the assembler log for both passes
        #[arg(short, long)]
        log: bool,
    },
    /// Show every instruction word split into its bit fields
    Dump {
        /// `.asm` or `.bin` file to show
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Place a watch on a `.asm` file to receive constant assembler updates
    Watch {
        /// `.asm` file to watch
        name: PathBuf,
    },
}

#[derive(clap::Args, Clone, Copy)]
struct ConfigArgs {
    /// Halt after this many executed instructions
    #[arg(long, env = "OCTAVO_MAX_CYCLES")]
    max_cycles: Option<u64>,
    /// Screen width in pixels (1-32)
    #[arg(long, env = "OCTAVO_SCREEN_WIDTH")]
    screen_width: Option<usize>,
    /// Screen height in pixels (1-32)
    #[arg(long, env = "OCTAVO_SCREEN_HEIGHT")]
    screen_height: Option<usize>,
    /// Fixed seed for the random number device
    #[arg(long, env = "OCTAVO_SEED")]
    seed: Option<u64>,
}

impl ConfigArgs {
    fn into_config(self) -> SimConfig {
        let defaults = SimConfig::default();
        SimConfig {
            screen_width: self.screen_width.unwrap_or(defaults.screen_width),
            screen_height: self.screen_height.unwrap_or(defaults.screen_height),
            max_cycles: self.max_cycles.unwrap_or(defaults.max_cycles),
            rng_seed: self.seed.or(defaults.rng_seed),
        }
    }
}

#[derive(Default)]
struct RunOptions {
    minimal: bool,
    json: bool,
    trace: bool,
    frames: bool,
    controller: u8,
    config: SimConfig,
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(octavo::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run {
                name,
                minimal,
                json,
                trace,
                frames,
                controller,
                config,
            } => run(
                &name,
                RunOptions {
                    minimal,
                    json,
                    trace,
                    frames,
                    controller,
                    config: config.into_config(),
                },
            ),
            Command::Compile { name, dest } => {
                file_message(Green, "Assembling", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let assembly = octavo::assemble(&contents)?;

                let out_file_name = dest.unwrap_or_else(|| name.with_extension("bin"));
                fs::write(&out_file_name, assembly.machine_code()).into_diagnostic()?;

                message(Green, "Finished", "emit binary");
                file_message(Green, "Saved", &out_file_name);
                Ok(())
            }
            Command::Check { name, log } => {
                file_message(Green, "Checking", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let assembly = octavo::assemble(&contents)?;
                if log {
                    for line in assembly.log() {
                        println!("{line}");
                    }
                }
                message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Dump { name, minimal } => dump(&name, Output::new(minimal)),
            Command::Watch { name } => {
                if !name.exists() {
                    bail!("File does not exist. Exiting...")
                }
                // Vim breaks if watching a single file
                let folder_path = match name.parent() {
                    Some(pth) if pth.is_dir() => pth.to_path_buf(),
                    _ => Path::new(".").to_path_buf(),
                };

                // Clear screen and move cursor to top left
                print!("\x1B[2J\x1B[2;1H");
                file_message(Green, "Watching", &name);
                message(Cyan, "Help", "press CTRL+C to exit");

                let mut watcher = Hotwatch::new_with_custom_delay(Duration::from_millis(500))
                    .into_diagnostic()?;

                watcher
                    .watch(folder_path, move |event: Event| match event.kind {
                        // Watch remove for vim changes
                        EventKind::Modify(_) | EventKind::Remove(_) => {
                            print!("\x1B[2J\x1B[2;1H");
                            file_message(Green, "Watching", &name);
                            message(Green, "Re-checking", "file change detected");
                            message(Cyan, "Help", "press CTRL+C to exit");

                            // Makes reruns more obvious
                            sleep(Duration::from_millis(50));

                            let contents = match fs::read_to_string(&name) {
                                Ok(cts) => cts,
                                Err(e) => {
                                    eprintln!("{e}. Exiting...");
                                    std::process::exit(1)
                                }
                            };
                            match octavo::assemble(&contents) {
                                Ok(assembly) => {
                                    let words = format!("{} words", assembly.air().len());
                                    message(Green, "Success", &words);
                                }
                                Err(e) => {
                                    println!("\n{:?}", miette::Report::new(e));
                                }
                            }
                            Flow::Continue
                        }
                        _ => Flow::Continue,
                    })
                    .into_diagnostic()?;
                watcher.run();
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        let opts = RunOptions {
            config: args.config.into_config(),
            ..Default::default()
        };
        run(&path, opts)
    } else {
        println!("\n~ octavo v{VERSION} ~");
        println!("{}", LOGO.truecolor(120, 200, 255).bold());
        println!("{SHORT_INFO}");
        Ok(())
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message<S>(color: MsgColor, left: S, right: S)
where
    S: Colorize + std::fmt::Display,
{
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

/// Program ready to load, with its source when assembled from text.
struct Program {
    code: Vec<u8>,
    source: Option<(String, Assembly)>,
}

fn load(name: &Path) -> Result<Program> {
    let Some(ext) = name.extension().and_then(|ext| ext.to_str()) else {
        bail!("File has no extension. Exiting...");
    };
    match ext {
        "asm" => {
            let contents = fs::read_to_string(name).into_diagnostic()?;
            let assembly = octavo::assemble(&contents)?;
            Ok(Program {
                code: assembly.machine_code().to_vec(),
                source: Some((contents, assembly)),
            })
        }
        "bin" => {
            let code = fs::read(name).into_diagnostic()?;
            if code.len() % 2 != 0 {
                bail!("File is not aligned to 16 bits")
            }
            Ok(Program { code, source: None })
        }
        _ => bail!("File has unknown extension. Exiting..."),
    }
}

fn run(name: &Path, opts: RunOptions) -> Result<()> {
    // Keep stdout clean for JSON consumers
    let status = !opts.json;
    if status {
        file_message(MsgColor::Green, "Assembling", name);
    }
    let program = load(name)?;

    let output = Output::new(opts.minimal);
    let devices = Terminal::new(output, opts.controller, opts.frames);
    let mut sim = Simulator::with_devices(opts.config, devices).into_diagnostic()?;
    sim.load_code(&program.code).into_diagnostic()?;

    if status {
        message(MsgColor::Green, "Running", "emitted binary");
    }
    let result = loop {
        let pc = sim.pc();
        let before = *sim.registers();
        match sim.step() {
            Ok(running) => {
                if opts.trace {
                    let line = program.source.as_ref().and_then(|(_, asm)| asm.source_line(pc));
                    let instr = sim.word_at(pc).and_then(|word| Instr::decode(word).ok());
                    output.print_trace(pc, sim.pc(), line, instr, &before, sim.registers());
                }
                if !running {
                    break Ok(());
                }
            }
            Err(fault) => {
                let (src, span) = match &program.source {
                    Some((src, asm)) => (src.as_str(), asm.span_of(pc)),
                    None => ("", None),
                };
                break Err(fault_report(&fault, pc, span, src));
            }
        }
    };

    let state = sim.state();
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&state).into_diagnostic()?);
    } else {
        output.print_state(&state);
        if !opts.frames && sim.devices().frames() > 0 {
            output.print_screen(&state.screen);
        }
    }
    result?;

    if status {
        let cycles = format!("cycle limit after {} cycles", state.cycle_count);
        message(MsgColor::Green, "Halted", &cycles);
        file_message(MsgColor::Green, "Completed", name);
    }
    Ok(())
}

fn dump(name: &Path, output: Output) -> Result<()> {
    let program = load(name)?;
    for (idx, pair) in program.code.chunks(2).enumerate() {
        let word_addr = idx as u16 + 1;
        let word = u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
        let nibble = (word >> 12) as u8;
        let bits = output.render_bits(word, &Instr::field_layout(nibble));
        let text = match Instr::decode(word) {
            Ok(instr) => instr.to_string(),
            Err(_) => format!("?? opcode {nibble:#x}"),
        };
        let label = program
            .source
            .as_ref()
            .and_then(|(_, asm)| asm.labels().name_of(word_addr as u32));
        if let Some(label) = label {
            println!("{label}:");
        }
        let origin = program.source.as_ref().and_then(|(src, asm)| {
            let line = asm.source_line(word_addr)?;
            let text = src.lines().nth(line - 1)?.trim();
            Some(format!("L{line}: {text}"))
        });

        if output.is_minimal() {
            match origin {
                Some(origin) => println!("{word_addr} 0x{word:04x} {bits} | {text} | {origin}"),
                None => println!("{word_addr} 0x{word:04x} {bits} | {text}"),
            }
        } else {
            println!(
                "{:>5}  {}  {:<24}  {:<16} {}",
                word_addr.to_string().bold(),
                format!("0x{word:04x}").dimmed(),
                bits,
                text,
                origin.unwrap_or_default().dimmed(),
            );
        }
    }
    Ok(())
}

const LOGO: &str = r#"
  ___   ___ _____ _ __   __ ___
 / _ \ / __|_   _/_\\ \ / // _ \
| (_) | (__  | |/ _ \\ V /| (_) |
 \___/ \___| |_/_/ \_\\_/  \___/ "#;

const SHORT_INFO: &str = r"
Welcome to octavo, an assembler and step simulator for a small 8-bit CPU
with 16-bit instruction words, a pixel screen and a controller port.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
