use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tinyml_sim::fetch::place_words;
use tinyml_sim::{load_config_from_file, Accelerator, AcceleratorConfig};

#[derive(Parser)]
struct Opts {
    #[arg(long)]
    /// Path to the memory image (`.hex` with one byte per line, or raw binary).
    image: PathBuf,

    #[arg(long)]
    /// Path to a program of 64-bit hex words placed at the start of the instruction segment.
    program: Option<PathBuf>,

    #[arg(long)]
    /// Path to the accelerator settings. Built-in defaults are used when absent.
    config: Option<PathBuf>,

    #[arg(long)]
    /// File to write the store segment to after the run.
    dump_store: Option<PathBuf>,

    #[arg(long, default_value_t = 0x10000)]
    /// Number of store segment bytes to dump.
    store_len: usize,

    #[arg(long)]
    /// Vector buffer id whose written contents are printed after the run.
    dump_buffer: Option<usize>,

    #[arg(long)]
    /// Stop the simulation at this cycle. Overrides `MAX_CYCLES` of the settings.
    max_cycles: Option<u64>,

    #[arg(long, short)]
    /// Quiet mode: only output final latency and statistics.
    quiet: bool,
}

fn read_program(path: &Path) -> anyhow::Result<Vec<u64>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read program {}", path.display()))?;
    text.split_whitespace()
        .map(|tok| {
            u64::from_str_radix(tok.trim_start_matches("0x"), 16)
                .with_context(|| format!("`{tok}` is not a hex instruction word"))
        })
        .collect()
}

async fn start(opts: Opts) -> anyhow::Result<()> {
    let config = match &opts.config {
        Some(path) => load_config_from_file(path)?,
        None => AcceleratorConfig::default(),
    };
    let max_cycles = opts
        .max_cycles
        .unwrap_or(config.config.max_cycles.value);
    let accelerator = Accelerator::new(config)?;

    let timer_load = clilog::stimer!("load_image");
    let mut image = memory::load_image(&opts.image)
        .with_context(|| format!("cannot load memory image {}", opts.image.display()))?;
    if let Some(path) = &opts.program {
        let words = read_program(path)?;
        let base = accelerator
            .memory()
            .map()
            .segment("instructions")
            .map(|s| s.start)
            .context("memory map has no instruction segment")?;
        clilog::info!("placing {} instruction words at {:#x}", words.len(), base);
        place_words(&mut image, base, words);
    }
    accelerator.seed(&image)?;
    clilog::finish!(timer_load);

    let timer_sim = clilog::stimer!("simulation");
    let report = accelerator.simulate(max_cycles).await?;
    clilog::finish!(timer_sim);

    for completion in &report.completions {
        clilog::debug!(
            "{} took {:?}, {} tiles",
            completion.instruction,
            completion.cycles,
            completion.tiles
        );
    }

    if let Some(id) = opts.dump_buffer {
        let contents = accelerator.buffers().contents(buffer::BufferKind::Vector, id)?;
        println!("Vector buffer {id}: {:?}", contents);
    }

    if let Some(path) = &opts.dump_store {
        let bytes = accelerator.dump_store(opts.store_len)?;
        let mut file = fs::File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        file.write_all(&bytes)?;
        clilog::info!("dumped {} store bytes to {}", bytes.len(), path.display());
    }

    eprintln!(
        "Simulation completed. Latency {:?}. Instructions {} ({} skipped)",
        report.cycles, report.executed, report.skipped
    );
    for (region, stats) in accelerator.memory_statistics() {
        eprintln!(
            "{} - Bytes read: {} | Bytes written: {}",
            region.name(),
            stats.total_bytes_read,
            stats.total_bytes_written
        );
    }
    let buffers = accelerator.buffers().total_stats();
    eprintln!(
        "Buffers - Tile reads: {} | Tile writes: {}",
        buffers.tile_reads, buffers.tile_writes
    );
    eprintln!("Executor - Polls: {}", accelerator.last_run().polls);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clilog::init_stderr_color_debug();
    let opts = Opts::parse();
    if opts.quiet {
        log::set_max_level(log::LevelFilter::Warn);
    }
    start(opts).await
}
