use std::sync::Arc;

use eyre::{bail, eyre, WrapErr};
use tokio_stream::StreamExt;

use dedup_ingest::{
    ingest_reader, ChunkResult, ConcurrentSession, DedupDecision, Deduper, EncodePipeline,
    IngestConfig, KeyMaterial, MemoryIndex,
};

const READ_SIZE: usize = 64 * 1024;
const KEY_VAR: &str = "INGEST_KEY";

#[derive(Default)]
struct Summary {
    chunks: usize,
    new: usize,
    duplicate: usize,
    failed: usize,
    bytes: u64,
    new_bytes: u64,
}

impl Summary {
    fn record(&mut self, result: &ChunkResult) {
        self.chunks += 1;
        self.bytes += result.length as u64;
        match &result.outcome {
            Ok(DedupDecision::NewChunk { .. }) => {
                self.new += 1;
                self.new_bytes += result.length as u64;
            }
            Ok(DedupDecision::DuplicateChunk) => self.duplicate += 1,
            Err(_) => self.failed += 1,
        }
    }
}

fn print_result(result: &ChunkResult) {
    let status = match &result.outcome {
        Ok(DedupDecision::NewChunk { fragments }) => format!("new ({} fragments)", fragments.len()),
        Ok(DedupDecision::DuplicateChunk) => "duplicate".to_owned(),
        Err(e) => format!("failed: {e}"),
    };
    println!(
        "{:>12} {:>8} {} {status}",
        result.offset, result.length, result.digest
    );
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    dotenv::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(input_path)) = (args.next(), args.next()) else {
        bail!("Usage: dedup-ingest <config.toml> <input-file>");
    };

    let config = IngestConfig::load(&config_path)?;
    let key = match std::env::var(KEY_VAR) {
        Ok(hex_key) => KeyMaterial::from_hex(&hex_key).wrap_err_with(|| format!("Bad {KEY_VAR}"))?,
        Err(_) => {
            eprintln!("{KEY_VAR} not set, sealing with a one-off random key");
            KeyMaterial::generate()
        }
    };

    let encoder = Arc::new(EncodePipeline::from_config(&config, &key)?);
    let session = ConcurrentSession::open(&config, Deduper::new(MemoryIndex::new()), encoder)?;
    let input = tokio::fs::File::open(&input_path)
        .await
        .wrap_err_with(|| format!("Unable to open {input_path}"))?;

    let mut summary = Summary::default();
    let results = ingest_reader(session, input, READ_SIZE);
    tokio::pin!(results);
    while let Some(result) = results.next().await {
        match result {
            Ok(result) => {
                print_result(&result);
                summary.record(&result);
            }
            Err(e) => {
                let message = e.to_string();
                for result in e.into_emitted() {
                    print_result(&result);
                    summary.record(&result);
                }
                return Err(eyre!(message).wrap_err(format!("Ingest of {input_path} failed")));
            }
        }
    }

    println!(
        "{} chunks, {} new ({} bytes), {} duplicate, {} failed, {} bytes total",
        summary.chunks,
        summary.new,
        summary.new_bytes,
        summary.duplicate,
        summary.failed,
        summary.bytes
    );
    Ok(())
}
