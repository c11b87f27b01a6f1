//! mipsim - CLI entry point
//!
//! Commands:
//! - `mipsim run <program.json>` - Run an assembled program file
//! - `mipsim inspect <program.json>` - Show a program's layout without running it

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};

use mipsim::{
    Cpu, ConsoleIo, EventSink, PipelinedCpu, Program, Register, SimulationEvent,
};

#[derive(Parser)]
#[command(name = "mipsim")]
#[command(version = "0.1.0")]
#[command(about = "Simulation core for a small-subset MIPS teaching simulator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an assembled program until it exits
    Run {
        /// Path to the assembled program (JSON)
        program: String,
        /// Use the 3-stage pipelined CPU
        #[arg(short, long)]
        pipelined: bool,
        /// Cycle frequency in Hz (0 = unthrottled)
        #[arg(short, long, default_value = "0")]
        freq: f64,
        /// Print simulation events to stderr
        #[arg(short, long)]
        trace: bool,
    },
    /// Show the layout of an assembled program
    Inspect {
        /// Path to the assembled program (JSON)
        program: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, pipelined, freq, trace }) => {
            run_program(&program, pipelined, freq, trace);
        }
        Some(Commands::Inspect { program }) => {
            inspect_program(&program);
        }
        None => {
            println!("mipsim v0.1.0");
            println!("Simulation core for a small-subset MIPS teaching simulator");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn load_program(path: &str) -> Arc<Program> {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("failed to read {}: {}", path, error);
            std::process::exit(1);
        }
    };
    match serde_json::from_str::<Program>(&source) {
        Ok(program) => Arc::new(program),
        Err(error) => {
            eprintln!("{} is not a valid assembled program: {}", path, error);
            std::process::exit(1);
        }
    }
}

fn run_program(path: &str, pipelined: bool, freq: f64, trace: bool) {
    let program = load_program(path);
    let io = Arc::new(ConsoleIo::new());

    // drain events on a side thread so emission never backs up
    let (events, tracer) = if trace {
        let (tx, rx) = mpsc::channel::<SimulationEvent>();
        let tracer = thread::spawn(move || {
            for event in rx {
                eprintln!("[event] {:?}", event);
            }
        });
        (EventSink::new(tx), Some(tracer))
    } else {
        (EventSink::disconnected(), None)
    };

    let outcome = if pipelined {
        match PipelinedCpu::new(program, io, events) {
            Ok(mut cpu) => {
                cpu.controls().set_cycle_freq(freq);
                let result = cpu.run_program();
                result.map(|_| summary(cpu.registers(), cpu.cycles()))
            }
            Err(error) => Err(error),
        }
    } else {
        match Cpu::new(program, io, events) {
            Ok(mut cpu) => {
                cpu.controls().set_cycle_freq(freq);
                let result = cpu.run_program();
                result.map(|_| summary(cpu.registers(), cpu.cycles()))
            }
            Err(error) => Err(error),
        }
    };

    if let Some(tracer) = tracer {
        let _ = tracer.join();
    }
    if let Err(error) = outcome {
        eprintln!("simulation failed: {}", error);
        std::process::exit(1);
    }
}

fn summary(registers: &mipsim::cpu::RegisterFile, cycles: u64) {
    println!();
    println!("--- finished after {} cycle(s) ---", cycles);
    for register in Register::ALL {
        let value = registers.get(register);
        if !value.is_zero() {
            let name = register.to_string();
            println!("  {:>5} = {:#010x} ({})", name, value.to_unsigned(), value.to_signed());
        }
    }
}

fn inspect_program(path: &str) {
    let program = load_program(path);
    println!("program: {}", program.name);
    println!("  statements: {}", program.text_segment.len());
    println!("  text start: {}", program.text_segment_start);
    if let Some(last) = program.last_address() {
        println!("  text end:   {}", last);
    }
    println!("  data bytes: {} at {}", program.data_segment.len(), program.data_segment_start);
    println!("  heap base:  {}", program.dynamic_segment_start);
    println!("  initial sp: {:#010x}", program.initial_sp.to_unsigned());
    match program.entry_point() {
        Some(entry) => println!("  entry:      {} (main)", entry),
        None => println!("  entry:      missing 'main' label!"),
    }
    let mut labels: Vec<_> = program.labels.iter().collect();
    labels.sort_by_key(|(_, address)| **address);
    for (name, address) in labels {
        println!("  label {} -> {}", name, address);
    }
}
