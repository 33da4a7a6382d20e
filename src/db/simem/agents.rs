// Market agents as published daily in dataset 972263.  An agent is identified
// by its SIC code, which packs the company and the activity of the agent.

use std::path::Path;

use itertools::Itertools;
use jiff::civil::Date;
use log::info;
use serde::Deserialize;

use crate::db::simem::lib_simem::{keep_last_by, parse_fecha, BuildError};
use crate::db::simem::public_data_archive::{read_json, SimemArchive};
use crate::db::simem::relational::{Cell, SqlType, Table};

pub const AGENTS_DATASET_ID: &str = "972263";

/// The columns used from a raw record.  Other fields are ignored.
#[derive(Debug, Deserialize)]
struct RawAgent {
    #[serde(rename = "Fecha")]
    fecha: String,
    #[serde(rename = "CodigoSICAgente")]
    agente: String,
    #[serde(rename = "NombreAgente")]
    nombre_empresa: Option<String>,
    #[serde(rename = "ActividadAgente")]
    nombre_actividad: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentRow {
    pub fecha: Date,
    pub agente: String,
    pub empresa: String,
    pub actividad: String,
    /// `None` if null in the file
    pub nombre_empresa: Option<String>,
    pub nombre_actividad: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct AgentCode {
    pub empresa: String,
    pub actividad: String,
}

/// Split a SIC agent code, e.g. `EPMG`:
/// - characters `[0, 3)` are the company, `EPM`
/// - the last character is the activity, `G`
///
/// Codes shorter than 4 characters are rejected.
pub fn parse_agent_code(agente: &str) -> Result<AgentCode, BuildError> {
    let chars: Vec<char> = agente.chars().collect();
    if chars.len() < 4 {
        return Err(BuildError::AgentCode(agente.to_string()));
    }
    Ok(AgentCode {
        empresa: chars[..3].iter().collect(),
        actividad: chars[chars.len() - 1].to_string(),
    })
}

/// Read one daily file.  Any bad row fails the whole file.
pub fn read_agents_file(path: &Path) -> Result<Vec<AgentRow>, BuildError> {
    let raw: Vec<RawAgent> = read_json(path)?;
    raw.into_iter()
        .map(|e| {
            let code = parse_agent_code(&e.agente)?;
            Ok(AgentRow {
                fecha: parse_fecha(&e.fecha, path)?,
                agente: e.agente,
                empresa: code.empresa,
                actividad: code.actividad,
                nombre_empresa: e.nombre_empresa,
                nombre_actividad: e.nombre_actividad,
            })
        })
        .collect()
}

/// Sort by (fecha, agente) and keep the most recent row of each agent.
pub fn latest_by_agent(rows: Vec<AgentRow>) -> Vec<AgentRow> {
    let sorted: Vec<AgentRow> = rows
        .into_iter()
        .sorted_by(|a, b| (a.fecha, &a.agente).cmp(&(b.fecha, &b.agente)))
        .collect();
    keep_last_by(sorted, |e| e.agente.clone())
}

/// Read all the daily agent files for the year, one row per agent.
pub fn build_agents(archive: &SimemArchive, year: i16) -> Result<Vec<AgentRow>, BuildError> {
    let paths = archive.daily_files(AGENTS_DATASET_ID, year)?;
    if paths.is_empty() {
        return Err(BuildError::NoFiles {
            dataset_id: AGENTS_DATASET_ID.to_string(),
            year,
            base_dir: archive.base_dir.clone(),
        });
    }
    let mut rows: Vec<AgentRow> = Vec::new();
    for path in &paths {
        rows.extend(read_agents_file(path)?);
    }
    info!(
        "Read {} agent rows from {} files for year={}",
        rows.len(),
        paths.len(),
        year
    );
    Ok(latest_by_agent(rows))
}

pub fn agentes_table(agents: &[AgentRow]) -> Table {
    Table {
        name: "agentes",
        columns: vec![
            ("agente", SqlType::Text),
            ("empresa", SqlType::Text),
            ("actividad", SqlType::Text),
        ],
        rows: agents
            .iter()
            .map(|e| {
                vec![
                    Cell::Text(Some(e.agente.clone())),
                    Cell::Text(Some(e.empresa.clone())),
                    Cell::Text(Some(e.actividad.clone())),
                ]
            })
            .collect(),
    }
}

/// One row per company, the name comes from its most recent agent.
pub fn empresas_table(agents: &[AgentRow]) -> Table {
    let rows = keep_last_by(agents.to_vec(), |e| e.empresa.clone());
    Table {
        name: "empresas",
        columns: vec![("empresa", SqlType::Text), ("nombre_empresa", SqlType::Text)],
        rows: rows
            .into_iter()
            .sorted_by(|a, b| a.empresa.cmp(&b.empresa))
            .map(|e| vec![Cell::Text(Some(e.empresa)), Cell::Text(e.nombre_empresa)])
            .collect(),
    }
}

pub fn actividades_table(agents: &[AgentRow]) -> Table {
    let rows = keep_last_by(agents.to_vec(), |e| e.actividad.clone());
    Table {
        name: "actividades",
        columns: vec![
            ("actividad", SqlType::Text),
            ("nombre_actividad", SqlType::Text),
        ],
        rows: rows
            .into_iter()
            .sorted_by(|a, b| a.actividad.cmp(&b.actividad))
            .map(|e| {
                vec![
                    Cell::Text(Some(e.actividad)),
                    Cell::Text(e.nombre_actividad),
                ]
            })
            .collect(),
    }
}
