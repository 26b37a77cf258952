//! Particle frames CLI - Demo drivers for checkpoint sequences.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::Path;
use std::time::Instant;

use particle_frames::{
    CheckpointError, Result,
    checkpoint::{FrameSequencer, MirrorWriter, naming::with_suffix},
    container::ContainerFile,
    schema::{CheckpointConfig, DiskSeed, FieldRegistry, SampleSeed},
};

/// Largest per-value difference accepted by `roundtrip`.
const TOLERANCE: f32 = 2.0e-4;

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let mut args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--example") {
        print_example_config();
        return;
    }

    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let Some(path) = args.get(i + 1).cloned() else {
                eprintln!("--config needs a file argument");
                std::process::exit(1);
            };
            args.drain(i..=i + 1);
            load_config(Path::new(&path))
        }
        None => CheckpointConfig::default(),
    };

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "disk" => {
            let n1d: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(128);
            let path = args.get(3).map_or("./data/disk_2d", String::as_str);
            run_disk(config, n1d.max(3), path)
        }
        "roundtrip" => {
            let particles: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            let frames: u32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1);
            let path = args.get(4).map_or("./data/frames", String::as_str);
            run_roundtrip(config, particles.max(1), frames.max(1), path)
        }
        "mirror" => match args.get(2) {
            Some(path) => run_mirror(&config, path),
            None => {
                eprintln!("mirror needs a frame file argument");
                print_usage(&args[0]);
                std::process::exit(1);
            }
        },
        other => {
            eprintln!("Unknown command: {other}");
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} [--config <config.json>] <command> [args]");
    eprintln!();
    eprintln!("Write particle checkpoint frames with XDMF mirrors.");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  disk [n1d] [path]                      2-D disk of gas particles (default: 128 ./data/disk_2d)");
    eprintln!("  roundtrip [particles] [frames] [path]  Write, read back and verify (default: 10 1 ./data/frames)");
    eprintln!("  mirror <frame.pcf>                     Write the XDMF mirror of an existing frame file");
    eprintln!();
    eprintln!("Example configuration is generated with --example flag.");
}

fn load_config(path: &Path) -> CheckpointConfig {
    let config_str = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });
    serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    })
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))
        }
        _ => Ok(()),
    }
}

fn run_disk(config: CheckpointConfig, n1d: usize, path: &str) -> Result<()> {
    println!("Creating {} lattice points", n1d * n1d);
    let disk = DiskSeed::generate(n1d);

    let mut registry = FieldRegistry::new();
    disk.register(&mut registry)?;

    ensure_parent_dir(path)?;
    let mut frames = FrameSequencer::new(registry, config)?;
    frames.open_session(path)?;
    frames.save_frame(0.0)?;
    frames.close_session()?;

    println!("Saved {} disk particles to {path}", disk.len());
    Ok(())
}

fn run_roundtrip(
    config: CheckpointConfig,
    particles: usize,
    frame_count: u32,
    path: &str,
) -> Result<()> {
    // Time runs from 0.0 to 1.0.
    let dt = if frame_count > 1 {
        1.0 / (frame_count - 1) as f32
    } else {
        0.0
    };

    ensure_parent_dir(path)?;

    println!("Writing {particles} particles to: {path}");
    let output = SampleSeed::new(particles);
    let mut registry = FieldRegistry::new();
    output.register(&mut registry)?;

    let start = Instant::now();
    let mut writer = FrameSequencer::new(registry, config.clone())?;
    writer.open_session(path)?;
    for frame in 1..=frame_count {
        let time = (frame - 1) as f32 * dt;
        output.fill(time);
        writer.save_frame(time)?;
        println!("  Saved frame {frame} at time {time:.3}");
    }
    writer.close_session()?;
    let write_elapsed = start.elapsed();

    println!();
    println!("Reading particles from: {path}");
    let input = SampleSeed::new(particles);
    let mut registry = FieldRegistry::new();
    input.register(&mut registry)?;

    let start = Instant::now();
    let mut reader = FrameSequencer::new(registry, config)?;
    reader.open_session(path)?;
    let mut failures = 0;
    let mut loaded = 0;
    while reader.load_frame()? {
        loaded += 1;
        output.fill(reader.frame_time());
        let status = match input.first_mismatch(&output, TOLERANCE) {
            None => "passed".to_string(),
            Some(i) => {
                failures += 1;
                format!("failed at particle {i}")
            }
        };
        println!(
            "  Loaded {particles} particles at time {:.3}: {status}",
            reader.frame_time()
        );
    }
    reader.close_session()?;
    let read_elapsed = start.elapsed();

    println!();
    println!(
        "Frames: {loaded}/{frame_count} read back, {failures} failed (write {:.2}s, read {:.2}s)",
        write_elapsed.as_secs_f32(),
        read_elapsed.as_secs_f32()
    );
    if failures > 0 || loaded != frame_count {
        return Err(CheckpointError::InconsistentCheckpoint(format!(
            "{path}: {failures} frames differ, {loaded} of {frame_count} found"
        )));
    }
    Ok(())
}

fn run_mirror(config: &CheckpointConfig, path: &str) -> Result<()> {
    let output = with_suffix(path, &config.mirror_suffix)?;
    if output == path {
        return Err(CheckpointError::InvalidName(format!(
            "{path} already has the mirror suffix {}",
            config.mirror_suffix
        )));
    }

    let container = ContainerFile::open(path).map_err(|e| CheckpointError::io(path, e))?;
    let mut mirror = MirrorWriter::create(&output)?;
    mirror.write_container_frame(&container, path)?;
    mirror.close()?;

    println!("Wrote {output}");
    Ok(())
}

fn print_example_config() {
    let config = CheckpointConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error serializing config: {e}"),
    }
}
