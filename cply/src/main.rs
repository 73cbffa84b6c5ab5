use clap::Parser;
use cply_lib::{decompress_ply, decompress_ply_async, DecodeOptions};
use std::error::Error;
use std::fs;
use std::process;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "Compressed PLY Decompressor",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Expands chunk-compressed splat PLY files into standard splat PLY files"
)]
struct Cli {
    #[arg(
        short = 'n',
        long = "normals",
        default_value = "false",
        help = "Include zeroed normals (nx, ny, nz) in the output PLY file."
    )]
    include_normals: bool,

    #[arg(
        long = "no-sh",
        default_value = "false",
        help = "Skip the higher-order spherical harmonics (f_rest_*) columns."
    )]
    no_sh: bool,

    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the compressed input file."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        required = true,
        help = "Path to the output file."
    )]
    output: String,

    #[arg(
        short = 'w',
        long = "workers",
        value_name = "WORKERS",
        default_value = "0",
        help = "Set the decode worker count (0 uses every core)."
    )]
    workers: u32,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Enable asynchronous decompression mode."
    )]
    async_mode: bool,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let options = DecodeOptions {
        workers: cli.workers,
        include_sh: !cli.no_sh,
    };
    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };

    println!(
        "Mode: {} Decompression\nInput: {} | Output: {} | {} normals | {} SH",
        mode,
        cli.input,
        cli.output,
        if cli.include_normals {
            "Including"
        } else {
            "Excluding"
        },
        if options.include_sh {
            "Including"
        } else {
            "Excluding"
        },
    );

    let start = Instant::now();

    let result: Vec<u8> = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(async {
            let file = tokio::fs::File::open(&cli.input).await.unwrap_or_else(|e| {
                eprintln!("Error reading input file {}: {}", cli.input, e);
                process::exit(1);
            });
            decompress_ply_async(tokio::io::BufReader::new(file), options, cli.include_normals)
                .await
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
        })?
    } else {
        let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
            eprintln!("Error reading input file {}: {}", cli.input, e);
            process::exit(1);
        });
        info!(bytes = raw_data.len(), "read input");
        let mut buf = Vec::new();
        decompress_ply(&raw_data, &options, cli.include_normals, &mut buf)
            .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
        buf
    };

    let elapsed = start.elapsed().as_millis();
    println!("Decompression Time: {} ms", elapsed);
    info!(bytes = result.len(), elapsed_ms = elapsed as u64, "decoded");

    fs::write(&cli.output, &result).unwrap_or_else(|e| {
        eprintln!("Error writing output '{}': {}", cli.output, e);
        process::exit(1);
    });
    println!("Successfully wrote to '{}'.", cli.output);

    Ok(())
}
