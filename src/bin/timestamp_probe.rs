use std::env;
use std::path::PathBuf;
use tracing::{error, info};

use readalong::timestamps::{highlight_at, segment_at_char, AudiobookTimestamps};

struct ProbeArgs {
    bundle_path: PathBuf,
    chapter_number: u32,
    times: Vec<f64>,
    char_offsets: Vec<usize>,
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    let probe_args = match parse_args(&args[1..]) {
        Ok(probe_args) => probe_args,
        Err(e) => {
            error!("{}", e);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    if let Err(e) = probe(probe_args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} <bundle.json> <chapter> [--at <seconds>]... [--char <offset>]...",
        program
    );
    eprintln!("Example: {} book.json 3 --at 12.5 --char 240", program);
}

fn parse_args(args: &[String]) -> Result<ProbeArgs, String> {
    let mut positional = Vec::new();
    let mut times = Vec::new();
    let mut char_offsets = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--at" => {
                let value = iter.next().ok_or("--at requires a time in seconds")?;
                let t = value
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid time: {}", value))?;
                times.push(t);
            }
            "--char" => {
                let value = iter.next().ok_or("--char requires a character offset")?;
                let offset = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid character offset: {}", value))?;
                char_offsets.push(offset);
            }
            other if other.starts_with("--") => {
                return Err(format!("Unknown option: {}", other));
            }
            _ => positional.push(arg.clone()),
        }
    }

    let [bundle_path, chapter] = positional.as_slice() else {
        return Err("Expected a bundle path and a chapter number".to_string());
    };
    let chapter_number = chapter
        .parse::<u32>()
        .map_err(|_| format!("Invalid chapter number: {}", chapter))?;

    Ok(ProbeArgs {
        bundle_path: PathBuf::from(bundle_path),
        chapter_number,
        times,
        char_offsets,
    })
}

async fn probe(args: ProbeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data = tokio::fs::read(&args.bundle_path).await?;
    let bundle = AudiobookTimestamps::from_json(&data)?;
    info!(
        audiobook_id = %bundle.audiobook_id,
        chapters = bundle.chapters.len(),
        "Loaded bundle {}",
        args.bundle_path.display()
    );

    let Some(chapter) = bundle.chapter(args.chapter_number) else {
        let available: Vec<String> = bundle.chapters.keys().map(|n| n.to_string()).collect();
        return Err(format!(
            "Chapter {} not in bundle (available: {})",
            args.chapter_number,
            available.join(", ")
        )
        .into());
    };

    println!("Chapter {}", args.chapter_number);
    println!("  version:  {}", chapter.version);
    println!("  method:   {:?}", chapter.method);
    println!("  language: {}", chapter.language);
    println!("  duration: {:.2}s", chapter.duration);
    println!("  segments: {}", chapter.segments.len());
    println!("  words:    {}", chapter.word_count());

    for t in &args.times {
        let state = highlight_at(chapter, *t);
        match state.segment_index.map(|idx| &chapter.segments[idx]) {
            Some(segment) => {
                println!(
                    "at {:.3}s: segment {} [{:.3}, {:.3}) chars {:?} {:?}",
                    t, segment.id, segment.start_time, segment.end_time, state.highlight_range, segment.text
                );
                if let Some(word_idx) = state.word_index {
                    let word = &segment.words[word_idx];
                    println!("  word {:?} chars {:?}", word.word, state.word_highlight_range);
                }
            }
            None => println!("at {:.3}s: no segment", t),
        }
    }

    for offset in &args.char_offsets {
        match segment_at_char(chapter, *offset) {
            Some(segment) => println!(
                "char {}: segment {} seeks to {:.3}s {:?}",
                offset, segment.id, segment.start_time, segment.text
            ),
            None => println!("char {}: no segment", offset),
        }
    }

    Ok(())
}
