// Energy bought under bilateral contracts, dataset d31647.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;
use jiff::civil::Date;
use log::{info, warn};
use serde::Deserialize;

use crate::db::simem::lib_simem::{keep_last_by, parse_fecha, BuildError};
use crate::db::simem::public_data_archive::{read_json, SimemArchive};
use crate::db::simem::relational::{Cell, SqlType, Table};

pub const CONTRACTS_DATASET_ID: &str = "d31647";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketType {
    NoRegulado,
    Regulado,
}

impl MarketType {
    /// One letter code used as primary key of `tipo_mercados`.
    pub fn code(&self) -> &'static str {
        match self {
            MarketType::NoRegulado => "N",
            MarketType::Regulado => "R",
        }
    }
}

impl FromStr for MarketType {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "No Regulado" => Ok(MarketType::NoRegulado),
            "Regulado" => Ok(MarketType::Regulado),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MarketType::NoRegulado => write!(f, "No Regulado"),
            MarketType::Regulado => write!(f, "Regulado"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawContract {
    #[serde(rename = "Fecha")]
    fecha: String,
    #[serde(rename = "CodigoAgenteComprador")]
    agente: Option<String>,
    #[serde(rename = "TipoMercado")]
    nombre_tipo_mercado: Option<String>,
    #[serde(rename = "Cantidad")]
    despacho_kwh: Option<f64>,
    #[serde(rename = "PPP")]
    precio_ponderado: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContractRow {
    pub fecha: Date,
    pub agente: Option<String>,
    pub nombre_tipo_mercado: Option<String>,
    /// `None` if the market type name is null or not a known one
    pub tipo_mercado: Option<MarketType>,
    pub despacho_kwh: f64,
    /// $/kWh
    pub precio_ponderado: f64,
    /// $
    pub total_comprado: f64,
}

/// Read one daily file.  Only rows with a positive quantity and a positive
/// price are kept.
pub fn read_contracts_file(path: &Path) -> Result<Vec<ContractRow>, BuildError> {
    let raw: Vec<RawContract> = read_json(path)?;
    let mut out: Vec<ContractRow> = Vec::new();
    let mut unknown: BTreeSet<String> = BTreeSet::new();
    for e in raw {
        let fecha = parse_fecha(&e.fecha, path)?;
        let (despacho_kwh, precio_ponderado) = match (e.despacho_kwh, e.precio_ponderado) {
            (Some(q), Some(p)) if q > 0.0 && p > 0.0 => (q, p),
            _ => continue,
        };
        let tipo_mercado = e
            .nombre_tipo_mercado
            .as_deref()
            .and_then(|name| name.parse::<MarketType>().ok());
        if tipo_mercado.is_none() {
            unknown.insert(
                e.nombre_tipo_mercado
                    .clone()
                    .unwrap_or_else(|| "null".to_string()),
            );
        }
        out.push(ContractRow {
            fecha,
            agente: e.agente,
            nombre_tipo_mercado: e.nombre_tipo_mercado,
            tipo_mercado,
            despacho_kwh,
            precio_ponderado,
            total_comprado: despacho_kwh * precio_ponderado,
        });
    }
    if !unknown.is_empty() {
        warn!(
            "Unknown market types {:?} in path={}, tipo_mercado left empty",
            unknown,
            path.display()
        );
    }
    Ok(out)
}

/// Read all the daily contract files for the year, sorted by (fecha, agente).
/// Rows without an agente come first within a day.
pub fn build_contracts(
    archive: &SimemArchive,
    year: i16,
) -> Result<Vec<ContractRow>, BuildError> {
    let paths = archive.daily_files(CONTRACTS_DATASET_ID, year)?;
    if paths.is_empty() {
        return Err(BuildError::NoFiles {
            dataset_id: CONTRACTS_DATASET_ID.to_string(),
            year,
            base_dir: archive.base_dir.clone(),
        });
    }
    let mut rows: Vec<ContractRow> = Vec::new();
    for path in &paths {
        rows.extend(read_contracts_file(path)?);
    }
    info!(
        "Read {} contract rows from {} files for year={}",
        rows.len(),
        paths.len(),
        year
    );
    Ok(rows
        .into_iter()
        .sorted_by(|a, b| (a.fecha, &a.agente).cmp(&(b.fecha, &b.agente)))
        .collect())
}

pub fn contratos_table(contracts: &[ContractRow]) -> Table {
    Table {
        name: "contratos",
        columns: vec![
            ("fecha", SqlType::Date),
            ("agente", SqlType::Text),
            ("despacho_kwh", SqlType::Double),
            ("precio_ponderado_$/kwh", SqlType::Double),
            ("total_comprado_$", SqlType::Double),
            ("tipo_mercado", SqlType::Text),
        ],
        rows: contracts
            .iter()
            .map(|e| {
                vec![
                    Cell::Date(e.fecha),
                    Cell::Text(e.agente.clone()),
                    Cell::Double(e.despacho_kwh),
                    Cell::Double(e.precio_ponderado),
                    Cell::Double(e.total_comprado),
                    Cell::Text(e.tipo_mercado.map(|m| m.code().to_string())),
                ]
            })
            .collect(),
    }
}

/// The market types seen in the contracts.  Unknown ones are left out,
/// they have no code.
pub fn tipo_mercados_table(contracts: &[ContractRow]) -> Table {
    let known: Vec<(MarketType, Option<&str>)> = contracts
        .iter()
        .filter_map(|e| e.tipo_mercado.map(|m| (m, e.nombre_tipo_mercado.as_deref())))
        .collect();
    Table {
        name: "tipo_mercados",
        columns: vec![
            ("tipo_mercado", SqlType::Text),
            ("nombre_tipo_mercado", SqlType::Text),
        ],
        rows: keep_last_by(known, |e| e.0.code())
            .into_iter()
            .map(|(m, name)| {
                vec![
                    Cell::Text(Some(m.code().to_string())),
                    Cell::Text(name.map(|e| e.to_string())),
                ]
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::fs;

    use jiff::civil::date;
    use serde_json::json;

    use super::*;

    fn write_day(archive: &SimemArchive, day: &str, records: serde_json::Value) -> String {
        let path = format!("{}/{}/{}.json", archive.base_dir, CONTRACTS_DATASET_ID, day);
        fs::create_dir_all(Path::new(&path).parent().unwrap()).unwrap();
        fs::write(&path, records.to_string()).unwrap();
        path
    }

    fn contract(
        agente: &str,
        tipo: &str,
        cantidad: serde_json::Value,
        ppp: serde_json::Value,
    ) -> serde_json::Value {
        json!({
            "Fecha": "2025-02-01",
            "CodigoAgenteComprador": agente,
            "TipoMercado": tipo,
            "Cantidad": cantidad,
            "PPP": ppp,
            "CodigoAgenteVendedor": "ISGG",
        })
    }

    #[test]
    fn market_type() {
        assert_eq!("Regulado".parse::<MarketType>(), Ok(MarketType::Regulado));
        assert_eq!("No Regulado".parse::<MarketType>(), Ok(MarketType::NoRegulado));
        assert_eq!(MarketType::Regulado.code(), "R");
        assert_eq!(MarketType::NoRegulado.code(), "N");
        assert_eq!(MarketType::NoRegulado.to_string(), "No Regulado");
        assert!("regulado".parse::<MarketType>().is_err());
    }

    #[test]
    fn filter_and_total() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = SimemArchive {
            base_dir: dir.path().display().to_string(),
        };
        let path = write_day(
            &archive,
            "2025-02-01",
            json!([
                contract("EPMC", "Regulado", json!(-5.0), json!(2.0)),
                contract("EPMC", "Regulado", json!(10.0), json!(2.0)),
                contract("ISGC", "No Regulado", json!(10.0), json!(0.0)),
                contract("CHVC", "No Regulado", json!(null), json!(3.0)),
            ]),
        );
        let rows = read_contracts_file(Path::new(&path))?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agente.as_deref(), Some("EPMC"));
        assert_eq!(rows[0].despacho_kwh, 10.0);
        assert_eq!(rows[0].precio_ponderado, 2.0);
        assert_eq!(rows[0].total_comprado, 20.0);
        assert_eq!(rows[0].tipo_mercado, Some(MarketType::Regulado));
        Ok(())
    }

    #[test]
    fn build_sorted_without_dedup() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = SimemArchive {
            base_dir: dir.path().display().to_string(),
        };
        let mut late = contract("ISGC", "No Regulado", json!(5.0), json!(100.0));
        late["Fecha"] = json!("2025-02-02");
        write_day(&archive, "2025-02-02", json!([late]));
        write_day(
            &archive,
            "2025-02-01",
            json!([
                contract("ISGC", "Regulado", json!(1.0), json!(1.0)),
                contract("EPMC", "Regulado", json!(2.0), json!(1.0)),
                contract("EPMC", "Regulado", json!(2.0), json!(1.0)),
            ]),
        );

        let rows = build_contracts(&archive, 2025)?;
        let keys: Vec<(Date, Option<&str>)> = rows
            .iter()
            .map(|e| (e.fecha, e.agente.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (date(2025, 2, 1), Some("EPMC")),
                (date(2025, 2, 1), Some("EPMC")),
                (date(2025, 2, 1), Some("ISGC")),
                (date(2025, 2, 2), Some("ISGC")),
            ]
        );
        Ok(())
    }

    #[test]
    fn unknown_market_type() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = SimemArchive {
            base_dir: dir.path().display().to_string(),
        };
        write_day(
            &archive,
            "2025-02-01",
            json!([
                contract("EPMC", "Mixto", json!(2.0), json!(1.0)),
                contract("ISGC", "No Regulado", json!(2.0), json!(1.0)),
            ]),
        );
        let rows = build_contracts(&archive, 2025)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tipo_mercado, None);

        let contratos = contratos_table(&rows);
        assert_eq!(contratos.rows[0][5], Cell::Text(None));
        assert_eq!(contratos.rows[1][5], Cell::Text(Some("N".to_string())));

        let tipos = tipo_mercados_table(&rows);
        assert_eq!(
            tipos.rows,
            vec![vec![
                Cell::Text(Some("N".to_string())),
                Cell::Text(Some("No Regulado".to_string()))
            ]]
        );
        Ok(())
    }

    #[test]
    fn null_text_fields() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = SimemArchive {
            base_dir: dir.path().display().to_string(),
        };
        write_day(
            &archive,
            "2025-02-01",
            json!([
                contract("ISGC", "Regulado", json!(2.0), json!(1.0)),
                contract("EPMC", "Regulado", json!(2.0), json!(1.0)),
            ]),
        );
        let path = format!("{}/{}/2025-02-01.json", archive.base_dir, CONTRACTS_DATASET_ID);
        let mut records: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        records[0]["TipoMercado"] = json!(null);
        records[1]["CodigoAgenteComprador"] = json!(null);
        fs::write(&path, records.to_string())?;

        let rows = build_contracts(&archive, 2025)?;
        assert_eq!(rows.len(), 2);
        // null agente sorts first
        assert_eq!(rows[0].agente, None);
        assert_eq!(rows[0].tipo_mercado, Some(MarketType::Regulado));
        assert_eq!(rows[1].agente.as_deref(), Some("ISGC"));
        assert_eq!(rows[1].nombre_tipo_mercado, None);
        assert_eq!(rows[1].tipo_mercado, None);

        let contratos = contratos_table(&rows);
        assert_eq!(contratos.rows[0][1], Cell::Text(None));
        assert_eq!(contratos.rows[1][5], Cell::Text(None));
        let tipos = tipo_mercados_table(&rows);
        assert_eq!(
            tipos.rows,
            vec![vec![
                Cell::Text(Some("R".to_string())),
                Cell::Text(Some("Regulado".to_string()))
            ]]
        );
        Ok(())
    }

    #[test]
    fn bad_date_is_fatal() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = SimemArchive {
            base_dir: dir.path().display().to_string(),
        };
        let mut bad = contract("EPMC", "Regulado", json!(2.0), json!(1.0));
        bad["Fecha"] = json!("2025-02-01 00:00");
        write_day(&archive, "2025-02-01", json!([bad]));
        assert!(matches!(
            build_contracts(&archive, 2025),
            Err(BuildError::Date { .. })
        ));
        Ok(())
    }

    #[test]
    fn market_types_table() {
        let row = |tipo: Option<MarketType>, name: &str| ContractRow {
            fecha: date(2025, 2, 1),
            agente: Some("EPMC".to_string()),
            nombre_tipo_mercado: Some(name.to_string()),
            tipo_mercado: tipo,
            despacho_kwh: 1.0,
            precio_ponderado: 1.0,
            total_comprado: 1.0,
        };
        let rows = vec![
            row(Some(MarketType::Regulado), "Regulado"),
            row(Some(MarketType::NoRegulado), "No Regulado"),
            row(Some(MarketType::Regulado), "Regulado"),
        ];
        let table = tipo_mercados_table(&rows);
        let codes: Vec<String> = table.rows.iter().map(|e| e[0].to_string()).collect();
        assert_eq!(codes, vec!["N", "R"]);
    }
}
