use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use jiff::civil::Date;
use log::{error, info, warn};
use regex::Regex;

use crate::db::simem::lib_simem::{BuildError, FetchError, PublicDataSource, Record};
use crate::interval::date_range::{date_range, Frequency};

/// Raw SIMEM datasets, one folder for each dataset id and one json file
/// for each day, e.g. `<base_dir>/972263/2025-01-31.json`.
#[derive(Clone)]
pub struct SimemArchive {
    pub base_dir: String,
}

/// What happened to one (dataset id, day) request.
#[derive(Debug)]
pub enum Outcome {
    Saved { path: String, count: usize },
    Empty,
    FetchFailed(FetchError),
    SaveFailed(io::Error),
}

#[derive(Debug)]
pub struct RequestOutcome {
    pub dataset_id: String,
    pub date: Date,
    pub outcome: Outcome,
}

impl SimemArchive {
    /// Return the json filename for the day.  Does not check if the file exists.
    pub fn filename(&self, dataset_id: &str, date: &Date) -> String {
        self.base_dir.to_owned() + "/" + dataset_id + "/" + &date.to_string() + ".json"
    }

    /// Write the records as a json array, overwriting any existing file.
    /// Nothing is written if there are no records.  The json goes to a
    /// `.tmp` file first and is renamed into place, so a failed write leaves
    /// the previous file as it was.
    pub fn save_records(
        &self,
        records: &[Record],
        dataset_id: &str,
        date: &Date,
    ) -> Result<Option<String>, io::Error> {
        if records.is_empty() {
            warn!(
                "No records to save for dataset_id={} date={}",
                dataset_id, date
            );
            return Ok(None);
        }
        let path = self.filename(dataset_id, date);
        if let Some(dir) = Path::new(&path).parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = format!("{}.tmp", path);
        let res = write_json(&tmp, records).and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = res {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        info!("Saved path={} ({} records)", path, records.len());
        Ok(Some(path))
    }

    /// All the daily files of a dataset for a given year, sorted by day.
    pub fn daily_files(&self, dataset_id: &str, year: i16) -> Result<Vec<PathBuf>, BuildError> {
        let dir = format!("{}/{}", self.base_dir, dataset_id);
        if !Path::new(&dir).is_dir() {
            return Ok(Vec::new());
        }
        let re = Regex::new(&format!(r"^{:04}-[0-9]{{2}}-[0-9]{{2}}\.json$", year))
            .expect("valid regex");
        let mut paths: Vec<PathBuf> = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|source| BuildError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| BuildError::Io {
                path: dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            if re.is_match(&name.to_string_lossy()) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Read one daily file back as generic records.
    pub fn read_file(&self, path: &Path) -> Result<Vec<Record>, BuildError> {
        read_json(path)
    }

    /// Download and save every (dataset id, day) pair, dataset ids in the
    /// outer loop.  A failed request is logged and skipped, never retried.
    /// Sleep `delay` after each request.
    pub fn extract_range<S: PublicDataSource>(
        &self,
        source: &S,
        start: Date,
        end: Date,
        dataset_ids: &[String],
        frequency: Frequency,
        delay: Duration,
    ) -> Vec<RequestOutcome> {
        let days = date_range(start, end, frequency);
        let total = days.len() * dataset_ids.len();
        info!(
            "Starting extraction: {} days ({}), {} datasets, {} requests",
            days.len(),
            frequency,
            dataset_ids.len(),
            total
        );

        let mut out: Vec<RequestOutcome> = Vec::with_capacity(total);
        let mut current = 0;
        for dataset_id in dataset_ids {
            info!("Processing dataset_id={}", dataset_id);
            for day in &days {
                current += 1;
                info!("[{}/{}] dataset_id={} date={}", current, total, dataset_id, day);
                let outcome = match source.get_records(*day, dataset_id) {
                    Ok(records) if records.is_empty() => {
                        warn!("Empty records for dataset_id={} date={}", dataset_id, day);
                        Outcome::Empty
                    }
                    Ok(records) => match self.save_records(&records, dataset_id, day) {
                        Ok(Some(path)) => Outcome::Saved {
                            path,
                            count: records.len(),
                        },
                        Ok(None) => Outcome::Empty,
                        Err(e) => {
                            error!(
                                "Failed to save dataset_id={} date={}: {}",
                                dataset_id, day, e
                            );
                            Outcome::SaveFailed(e)
                        }
                    },
                    Err(e) => {
                        error!("Failed to get dataset_id={} date={}: {}", dataset_id, day, e);
                        Outcome::FetchFailed(e)
                    }
                };
                out.push(RequestOutcome {
                    dataset_id: dataset_id.clone(),
                    date: *day,
                    outcome,
                });
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
        info!("Extraction done, {} requests", current);
        out
    }
}

fn write_json(path: &str, records: &[Record]) -> Result<(), io::Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, records).map_err(io::Error::from)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Deserialize a whole json file.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, BuildError> {
    let file = File::open(path).map_err(|source| BuildError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| BuildError::Json {
        path: path.display().to_string(),
        source,
    })
}
