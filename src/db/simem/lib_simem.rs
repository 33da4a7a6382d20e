// Shared pieces for the SIMEM public data API.
// https://www.simem.co/backend-files/api/PublicData

use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;
use std::time::Duration;

use jiff::civil::Date;
use log::debug;
use reqwest::blocking::Client;
use serde_json::{Map, Value};
use thiserror::Error;

pub const BASE_URL: &str = "https://www.simem.co/backend-files/api/PublicData";

/// One flat record, as returned by the API.
pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("connection error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("response is not valid json ({source}), body: {snippet}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        snippet: String,
    },
    #[error("response has no result.records, available keys: {keys:?}")]
    MissingRecords { keys: Vec<String> },
    #[error("records entry is not an object: {0}")]
    NotARecord(Value),
}

/// Errors while turning the daily files into tables.  All of them stop the build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no files found for dataset {dataset_id} and year {year} in {base_dir}")]
    NoFiles {
        dataset_id: String,
        year: i16,
        base_dir: String,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid date '{value}' in {path}, expecting YYYY-MM-DD")]
    Date { path: String, value: String },
    #[error("invalid agent code '{0}', expecting at least 4 characters")]
    AgentCode(String),
}

impl FetchError {
    fn from_reqwest(e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(e)
        } else {
            FetchError::Transport(e)
        }
    }
}

/// Something that can return the records of a dataset for one day.
pub trait PublicDataSource {
    fn get_records(&self, date: Date, dataset_id: &str) -> Result<Vec<Record>, FetchError>;
}

pub struct SimemClient {
    base_url: String,
    client: Client,
}

impl SimemClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<SimemClient, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(SimemClient {
            base_url: base_url.to_string(),
            client,
        })
    }
}

impl PublicDataSource for SimemClient {
    /// Ask for one day only, `startDate` and `endDate` are always the same.
    fn get_records(&self, date: Date, dataset_id: &str) -> Result<Vec<Record>, FetchError> {
        let day = date.to_string();
        debug!(
            "GET {} startDate={} endDate={} datasetId={}",
            self.base_url, day, day, dataset_id
        );
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("startDate", day.as_str()),
                ("endDate", day.as_str()),
                ("datasetId", dataset_id),
            ])
            .send()
            .map_err(FetchError::from_reqwest)?;
        debug!("status={}", response.status());
        let response = response
            .error_for_status()
            .map_err(FetchError::from_reqwest)?;
        let body = response.text().map_err(FetchError::from_reqwest)?;
        parse_records(&body)
    }
}

/// Extract `result.records` from a response body.
pub fn parse_records(body: &str) -> Result<Vec<Record>, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(|source| FetchError::InvalidJson {
        source,
        snippet: body.chars().take(200).collect(),
    })?;
    debug!("success={}", value["success"]);

    let records = match value.pointer("/result/records") {
        Some(Value::Array(xs)) => xs,
        _ => {
            let keys = match &value {
                Value::Object(m) => m.keys().cloned().collect(),
                _ => Vec::new(),
            };
            return Err(FetchError::MissingRecords { keys });
        }
    };
    records
        .iter()
        .map(|e| match e {
            Value::Object(m) => Ok(m.clone()),
            other => Err(FetchError::NotARecord(other.clone())),
        })
        .collect()
}

/// Parse a `Fecha` value.  Only the `YYYY-MM-DD` form is accepted.
pub fn parse_fecha(value: &str, path: &Path) -> Result<Date, BuildError> {
    let err = || BuildError::Date {
        path: path.display().to_string(),
        value: value.to_string(),
    };
    let bytes = value.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(err());
    }
    Date::strptime("%Y-%m-%d", value).map_err(|_| err())
}

/// Keep only the last row for each key.  Surviving rows keep their
/// relative order.
pub fn keep_last_by<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut last: HashMap<K, usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        last.insert(key(row), i);
    }
    rows.into_iter()
        .enumerate()
        .filter(|(i, row)| last.get(&key(row)) == Some(i))
        .map(|(_, row)| row)
        .collect()
}
