use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use bookfetch_rs::{
    AcquisitionConfig,
    AcquisitionEngine,
    AcquisitionRequest,
    AskAnswer,
    CandidateChooser,
    CandidateRecord,
    OverwritePolicy,
    SourceSite,
    VERSION,
};
use tokio::runtime::Runtime;

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_bool(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => true,
        "n" | "no" | "false" => false,
        _ => default,
    }
}

/// Lists every hit on stdout and reads a 1-based choice.
struct PromptChooser;

impl CandidateChooser for PromptChooser {
    fn choose(&self, _request: &AcquisitionRequest, candidates: &[CandidateRecord]) -> Option<usize> {
        for (index, candidate) in candidates.iter().enumerate() {
            println!(
                "  [{}] {} ({:.1} MB)",
                index + 1,
                candidate.title,
                candidate.approx_size_mb
            );
        }
        let answer = prompt("Pick a result [1]:").ok()?;
        if answer.is_empty() {
            return Some(0);
        }
        answer.parse::<usize>().ok()?.checked_sub(1)
    }
}

#[test]
#[ignore = "Requires Chromium, network access and manual input"]
fn interactive_acquisition() -> Result<(), Box<dyn Error>> {
    println!("bookfetch-rs {} interactive smoke test", VERSION);
    println!("Provide inputs when prompted. Press Enter to accept defaults.\n");

    let query = prompt("Title or ISBN [9780135957059]:")?;
    let query = if query.is_empty() {
        "9780135957059".to_string()
    } else {
        query
    };
    let output = prompt("Output directory [./library]:")?;
    let output = if output.is_empty() {
        PathBuf::from("./library")
    } else {
        PathBuf::from(output)
    };
    let libgen = parse_bool(&prompt("Use Library Genesis instead of Anna's Archive? (y/N):")?, false);
    let headed = parse_bool(&prompt("Show the browser window? (y/N):")?, false);
    let choose = parse_bool(&prompt("Choose among all results? (y/N):")?, false);

    let mut config = AcquisitionConfig::default();
    config.apply_env()?;
    if headed {
        config.browser.headless = false;
    }

    let mut builder = AcquisitionEngine::builder()
        .with_config(config)
        .with_ask_callback(|path| {
            let answer = prompt(&format!("{} exists. [o]verwrite/[s]kip/[c]ancel:", path.display()))
                .unwrap_or_default();
            match answer.as_str() {
                "o" => AskAnswer::Overwrite,
                "s" => AskAnswer::Skip,
                _ => AskAnswer::Cancel,
            }
        })
        .with_progress_callback(|progress| {
            if let Some(percent) = progress.percent {
                println!("  {}%", percent);
            }
        });
    if choose {
        builder = builder.with_candidate_chooser(Arc::new(PromptChooser));
    }
    let engine = builder.build()?;

    let request = AcquisitionRequest::new(query, output)
        .with_overwrite_policy(OverwritePolicy::Ask)
        .with_source_site(if libgen {
            SourceSite::LibraryGenesis
        } else {
            SourceSite::AnnasArchive
        });

    let runtime = Runtime::new()?;
    println!("\nAcquiring `{}`...", request.identifier);
    match runtime.block_on(engine.acquire(&request)) {
        Ok(result) => println!(
            "Saved {} bytes from mirror #{} to {}",
            result.bytes_written,
            result.source_mirror_index + 1,
            result.filepath.display()
        ),
        Err(err) => println!("Acquisition failed: {}", err),
    }

    println!("Interactive test complete. Re-run with different inputs as needed.");
    Ok(())
}
