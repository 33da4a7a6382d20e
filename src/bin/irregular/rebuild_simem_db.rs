use std::{env, error::Error, path::Path};

use clap::Parser;
use log::info;
use simem::db::{
    prod_db::ProdDb,
    simem::{
        agents::{actividades_table, agentes_table, build_agents, empresas_table},
        contracts::{build_contracts, contratos_table, tipo_mercados_table},
        public_data_archive::SimemArchive,
        relational::{rebuild_schema, PgStore},
    },
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Only the daily files of this year are loaded
    #[arg(long, default_value_t = 2025)]
    year: i16,

    /// Archive folder, one subfolder for each dataset id
    #[arg(long)]
    base_dir: Option<String>,
}

/// Recreate all the tables from the files in the archive.  Run it against an
/// empty schema, the constraints can't be added twice.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;
    let store = PgStore::new(&env::var("DATABASE_URL")?);

    let archive = match args.base_dir {
        Some(base_dir) => SimemArchive { base_dir },
        None => ProdDb::simem_public_data(),
    };
    let agents = build_agents(&archive, args.year)?;
    let contracts = build_contracts(&archive, args.year)?;

    let tables = vec![
        agentes_table(&agents),
        empresas_table(&agents),
        actividades_table(&agents),
        tipo_mercados_table(&contracts),
        contratos_table(&contracts),
    ];
    for table in &tables {
        info!("{} ({} rows)\n{}", table.name, table.rows.len(), table.head(5));
    }

    rebuild_schema(&store, &tables).await?;
    info!("done");

    Ok(())
}
