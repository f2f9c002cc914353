use crate::record::{self, MatchRecord};
use crate::riot_api::{ApiError, RiotClient};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Callback for obtaining a replacement API key from the operator. Blocks
/// until the operator answers.
pub type KeyPrompt<'a> = &'a mut dyn FnMut() -> Result<String>;

#[derive(Debug, Clone)]
pub struct CollectArgs {
    pub start_id: i64,
    pub end_id: i64,
    pub batch_size: usize,
    pub out_dir: PathBuf,
    pub platform: String,
    pub include_match_id: bool,
    pub log_interval_secs: u64,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    start_id: i64,
    end_id: i64,
    batch_size: usize,
    platform: &'a str,
    game_version: &'static str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    valid_matches: usize,
    chunks_written: usize,
}

/// Walks the ID range sequentially. A failure while processing one ID is
/// logged and skipped; only output-directory creation and the final flush can
/// end the run early.
pub fn collect_run(args: &CollectArgs, client: &RiotClient, prompt: KeyPrompt) -> Result<()> {
    let run_dir = args
        .out_dir
        .join(format!("{}-{}", args.start_id, args.end_id));
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create output directory {}", run_dir.display()))?;

    let champion_names = match client.get_champion_names() {
        Ok(names) => names,
        Err(err) => {
            eprintln!(
                "Failed to fetch champion index, ban slots will use raw ids: {}",
                err
            );
            HashMap::new()
        }
    };

    let started_at = Utc::now();
    let start = Instant::now();
    let mut last_log = Instant::now();
    let mut writer = ChunkWriter::new(run_dir.clone(), args.batch_size);
    let mut valid_ids: Vec<i64> = Vec::new();
    let mut scanned = 0usize;

    for id in args.start_id..args.end_id {
        if last_log.elapsed() >= Duration::from_secs(args.log_interval_secs) {
            eprintln!(
                "[collect] elapsed={}s scanned={} valid={} chunks={}",
                start.elapsed().as_secs(),
                scanned,
                valid_ids.len(),
                writer.chunks_written()
            );
            last_log = Instant::now();
        }

        scanned += 1;

        match collect_match(client, &mut *prompt, args, &champion_names, id) {
            Ok(Some(record)) => {
                eprintln!("Match id {} is valid.", id);
                valid_ids.push(id);

                match writer.push(record) {
                    Ok(true) => {
                        if let Err(err) = write_valid_ids(&run_dir, &valid_ids) {
                            eprintln!("Failed to write valid ID index: {}", err);
                        }
                    }
                    Ok(false) => {}
                    // The batch is retained; the next append retries the flush.
                    Err(err) => eprintln!("Failed to write chunk for {}: {}", id, err),
                }
            }
            Ok(None) => {}
            Err(err) => eprintln!("Error occurred for {}: {}", id, err),
        }
    }

    let chunks_written = writer.finish()?;
    write_valid_ids(&run_dir, &valid_ids)?;

    let summary = RunSummary {
        start_id: args.start_id,
        end_id: args.end_id,
        batch_size: args.batch_size,
        platform: &args.platform,
        game_version: record::EXPECTED_GAME_VERSION,
        started_at,
        finished_at: Utc::now(),
        valid_matches: valid_ids.len(),
        chunks_written,
    };
    fs::write(run_dir.join("run.json"), serde_json::to_vec_pretty(&summary)?)?;

    eprintln!(
        "[collect] done: scanned={} valid={} chunks={}",
        scanned,
        valid_ids.len(),
        chunks_written
    );

    Ok(())
}

/// Fetch, filter and flatten one match. Ok(None) means the ID was discarded
/// (failed fetch or filtered out); Err means extraction broke and the caller
/// logs the ID.
fn collect_match(
    client: &RiotClient,
    prompt: KeyPrompt,
    args: &CollectArgs,
    champion_names: &HashMap<i64, String>,
    id: i64,
) -> Result<Option<MatchRecord>> {
    let match_id = format!("{}_{}", args.platform.to_uppercase(), id);

    // One refresh-and-retry on an expired key; any further fetch failure
    // discards the ID without surfacing an error.
    let match_json = match with_key_refresh(client, &mut *prompt, &|c| c.get_match_json(&match_id))
    {
        Ok(json) => json,
        Err(_) => return Ok(None),
    };

    if !record::passes_collection_filter(&match_json) {
        return Ok(None);
    }

    let mut solo_rank = |puuid: &str| -> Result<String> {
        let rank = with_key_refresh(client, &mut *prompt, &|c| c.get_solo_rank_by_puuid(puuid))?;
        rank.ok_or_else(|| anyhow!("no ranked solo entry for {}", puuid))
    };

    let record = record::build_record(
        &match_json,
        args.include_match_id.then_some(id),
        champion_names,
        &mut solo_rank,
    )?;

    Ok(Some(record))
}

/// Runs `op`; on an expired credential, re-prompts the operator once, swaps
/// the key on the client and retries exactly once. Every other error, and a
/// second expiry, is returned to the caller.
fn with_key_refresh<T>(
    client: &RiotClient,
    prompt: KeyPrompt,
    op: &dyn Fn(&RiotClient) -> Result<T, ApiError>,
) -> Result<T> {
    match op(client) {
        Ok(value) => Ok(value),
        Err(ApiError::CredentialExpired) => {
            eprintln!("Your Riot API key has expired.");
            let key = prompt()?;
            client.set_api_key(&key);
            Ok(op(client)?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Accumulates records and writes them out as sequentially numbered JSON
/// chunk files of exactly `batch_size` records, plus one short remainder on
/// `finish`. A failed write keeps the records buffered.
pub struct ChunkWriter {
    dir: PathBuf,
    batch_size: usize,
    batch: Vec<MatchRecord>,
    chunks_written: usize,
}

impl ChunkWriter {
    pub fn new(dir: PathBuf, batch_size: usize) -> Self {
        Self {
            dir,
            batch_size: batch_size.max(1),
            batch: Vec::new(),
            chunks_written: 0,
        }
    }

    pub fn chunks_written(&self) -> usize {
        self.chunks_written
    }

    /// Returns true when this push flushed a full chunk to disk.
    pub fn push(&mut self, record: MatchRecord) -> Result<bool> {
        self.batch.push(record);

        if self.batch.len() >= self.batch_size {
            self.flush(self.batch_size)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Flushes everything still buffered and returns the chunk count.
    pub fn finish(&mut self) -> Result<usize> {
        while self.batch.len() >= self.batch_size {
            self.flush(self.batch_size)?;
        }
        if !self.batch.is_empty() {
            let remainder = self.batch.len();
            self.flush(remainder)?;
        }

        Ok(self.chunks_written)
    }

    fn flush(&mut self, count: usize) -> Result<()> {
        let file_path = self.dir.join(format!("{}.json", self.chunks_written));
        eprintln!(
            "Writing {} with {} records.",
            file_path.display(),
            count
        );

        let serialized = serde_json::to_vec_pretty(&self.batch[..count])?;
        fs::write(&file_path, serialized)
            .with_context(|| format!("failed to write {}", file_path.display()))?;

        self.chunks_written += 1;
        self.batch.drain(..count);

        Ok(())
    }
}

/// Working replacement for the collector's valid-ID checkpoint: rewritten
/// whole on every chunk flush and at end of run.
fn write_valid_ids(run_dir: &Path, valid_ids: &[i64]) -> Result<()> {
    let file_path = run_dir.join("valid_ids.csv");
    let mut writer = csv::Writer::from_path(&file_path)?;

    writer.write_record(["match_id"])?;
    for id in valid_ids {
        writer.write_record([id.to_string()])?;
    }
    writer.flush()?;

    Ok(())
}
