use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{miette, IntoDiagnostic, Result};

use braid::preproc::{self, Preprocessed};
use braid::program::Image;
use braid::resolver::DiskResolver;
use braid::runtime::Runner;
use braid::AsmParser;

/// braid is an assembler toolchain & simulator for the Z33 teaching
/// architecture.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Preprocess, assemble and run a `.s` file
    Run {
        /// `.s` file to run
        name: PathBuf,
    },
    /// Assemble a `.s` file into a binary image to run later
    Assemble {
        /// `.s` file to assemble
        name: PathBuf,
        /// Destination of the image file
        dest: Option<PathBuf>,
    },
    /// Check a `.s` file without running or writing an image
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Print the preprocessed source text
    Expand {
        /// File to expand
        name: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let Some(command) = args.command else {
        println!("\n~ braid v{VERSION} ~");
        println!("{SHORT_INFO}");
        return Ok(());
    };

    match command {
        Command::Run { name } => {
            let (_, image) = assemble(&name)?;
            println!("{:>12} binary", "Running".green().bold());
            let mut runner = Runner::new();
            runner.load_image(&image)?;
            runner.run()?;
            println!(
                "{:>12} target {}",
                "Completed".green().bold(),
                name.display()
            );
            Ok(())
        }
        Command::Assemble { name, dest } => {
            let (_, image) = assemble(&name)?;
            let out_file_name = dest.unwrap_or_else(|| {
                format!(
                    "{}.z33",
                    name.file_stem().unwrap_or_default().to_string_lossy()
                )
                .into()
            });
            write_image(&image, &out_file_name)?;
            println!(
                "{:>12} {}",
                "Saved to".green().bold(),
                out_file_name.display()
            );
            Ok(())
        }
        Command::Check { name } => {
            let (_, image) = assemble(&name)?;
            println!(
                "{:>12} with {} words",
                "Finished".green().bold(),
                image.cells().len()
            );
            Ok(())
        }
        Command::Expand { name } => {
            let expanded = expand(&name)?;
            print!("{}", expanded.text());
            Ok(())
        }
    }
}

fn expand(name: &Path) -> Result<Preprocessed> {
    let resolver = DiskResolver::for_file(name);
    let file = name
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| miette!("invalid file name: {}", name.display()))?;
    println!(
        "{:>12} target {}",
        "Expanding".green().bold(),
        name.display()
    );
    preproc::preprocess(&resolver, file)
}

fn assemble(name: &Path) -> Result<(Preprocessed, Image)> {
    let expanded = expand(name)?;
    println!(
        "{:>12} target {}",
        "Assembling".green().bold(),
        name.display()
    );
    let program = AsmParser::new(expanded.text()).parse()?;
    let image = program.assemble(expanded.text())?;
    Ok((expanded, image))
}

/// Image format: start address, then the contiguous words from the lowest to
/// the highest assembled cell, all big-endian.
fn write_image(image: &Image, dest: &Path) -> Result<()> {
    let cells = image.cells();
    let start = cells.iter().map(|(addr, _)| *addr).min().unwrap_or(0);
    let end = cells.iter().map(|(addr, _)| *addr).max().unwrap_or(0);

    let mut words = vec![0u32; (end - start + 1) as usize];
    for (addr, value) in cells {
        words[(addr - start) as usize] = *value;
    }

    let mut file = File::create(dest).into_diagnostic()?;
    file.write_all(&start.to_be_bytes()).into_diagnostic()?;
    for word in words {
        file.write_all(&word.to_be_bytes()).into_diagnostic()?;
    }
    Ok(())
}

const SHORT_INFO: &str = r"
braid is a toolchain for the Z33 teaching architecture: a preprocessor,
an assembler and an instruction-set simulator in one binary.
Please use `-h` or `--help` to access the usage instructions.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
