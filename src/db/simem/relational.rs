// Relational schema built from the SIMEM archive and loaded into Postgres.
//
//   empresas    actividades          tipo_mercados
//        \        /                        |
//         agentes  <------------------  contratos
//

use std::fmt;

use itertools::Itertools;
use jiff::civil::Date;
use log::info;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tabled::builder::Builder;
use tabled::settings::Style;
use thiserror::Error;

pub const SCHEMA: &str = "public";

/// Postgres rejects statements with more bind parameters than this.
const MAX_BIND_PARAMETERS: usize = 65_535;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Date,
    Double,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SqlType::Text => write!(f, "TEXT"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Double => write!(f, "DOUBLE PRECISION"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Text(Option<String>),
    Date(Date),
    Double(f64),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cell::Text(Some(s)) => write!(f, "{}", s),
            Cell::Text(None) => write!(f, ""),
            Cell::Date(d) => write!(f, "{}", d),
            Cell::Double(x) => write!(f, "{}", x),
        }
    }
}

/// A fully materialized table, ready to replace its namesake in the database.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub name: &'static str,
    pub columns: Vec<(&'static str, SqlType)>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", SCHEMA, self.name)
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", self.qualified_name())
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE {} ({});",
            self.qualified_name(),
            self.columns
                .iter()
                .map(|(name, typ)| format!("\"{}\" {}", name, typ))
                .join(", ")
        )
    }

    fn insert_prefix(&self) -> String {
        format!(
            "INSERT INTO {} ({}) ",
            self.qualified_name(),
            self.columns
                .iter()
                .map(|(name, _)| format!("\"{}\"", name))
                .join(", ")
        )
    }

    /// How many rows fit in one INSERT statement.
    fn rows_per_insert(&self) -> usize {
        (MAX_BIND_PARAMETERS / self.columns.len().max(1)).max(1)
    }

    /// Make an ASCII table with the first `n` rows.
    pub fn head(&self, n: usize) -> tabled::Table {
        let mut builder = Builder::new();
        builder.push_record(self.columns.iter().map(|(name, _)| name.to_string()));
        for row in self.rows.iter().take(n) {
            builder.push_record(row.iter().map(|e| e.to_string()));
        }
        let mut table = builder.build();
        table.with(Style::sharp());
        table
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint {
    PrimaryKey {
        name: &'static str,
        table: &'static str,
        column: &'static str,
    },
    ForeignKey {
        name: &'static str,
        table: &'static str,
        column: &'static str,
        references: &'static str,
        referenced_column: &'static str,
    },
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Constraint::PrimaryKey { name, .. } => *name,
            Constraint::ForeignKey { name, .. } => *name,
        }
    }

    pub fn sql(&self) -> String {
        match self {
            Constraint::PrimaryKey {
                name,
                table,
                column,
            } => format!(
                "ALTER TABLE {}.{} ADD CONSTRAINT {} PRIMARY KEY ({});",
                SCHEMA, table, name, column
            ),
            Constraint::ForeignKey {
                name,
                table,
                column,
                references,
                referenced_column,
            } => format!(
                "ALTER TABLE {}.{} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}.{}({});",
                SCHEMA, table, name, column, SCHEMA, references, referenced_column
            ),
        }
    }
}

/// Primary keys, in the order they get applied.
pub fn primary_keys() -> Vec<Constraint> {
    vec![
        Constraint::PrimaryKey {
            name: "pk_actividad",
            table: "actividades",
            column: "actividad",
        },
        Constraint::PrimaryKey {
            name: "pk_empresa",
            table: "empresas",
            column: "empresa",
        },
        Constraint::PrimaryKey {
            name: "pk_agente",
            table: "agentes",
            column: "agente",
        },
        Constraint::PrimaryKey {
            name: "pk_tipo_mercado",
            table: "tipo_mercados",
            column: "tipo_mercado",
        },
    ]
}

/// Foreign keys, in the order they get applied.  Every referenced column
/// is a primary key from [`primary_keys`].
pub fn foreign_keys() -> Vec<Constraint> {
    vec![
        Constraint::ForeignKey {
            name: "fk_agente_actividad",
            table: "agentes",
            column: "actividad",
            references: "actividades",
            referenced_column: "actividad",
        },
        Constraint::ForeignKey {
            name: "fk_agente_empresa",
            table: "agentes",
            column: "empresa",
            references: "empresas",
            referenced_column: "empresa",
        },
        Constraint::ForeignKey {
            name: "fk_agente_agente",
            table: "contratos",
            column: "agente",
            references: "agentes",
            referenced_column: "agente",
        },
        Constraint::ForeignKey {
            name: "fk_contrato_tipo_mercado",
            table: "contratos",
            column: "tipo_mercado",
            references: "tipo_mercados",
            referenced_column: "tipo_mercado",
        },
    ]
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to replace table {table}: {source}")]
    ReplaceTable {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to add constraint {constraint}: {source}")]
    Constraint {
        constraint: String,
        #[source]
        source: sqlx::Error,
    },
}

/// A Postgres database.  Every statement group gets its own connection,
/// closed before returning.
pub struct PgStore {
    url: String,
}

impl PgStore {
    pub fn new(url: &str) -> PgStore {
        PgStore {
            url: url.to_string(),
        }
    }

    /// Drop the table if it exists, create it again and insert all the rows,
    /// in one transaction.  Return the number of rows inserted.
    pub async fn replace_table(&self, table: &Table) -> Result<u64, LoadError> {
        let err = |source| LoadError::ReplaceTable {
            table: table.name.to_string(),
            source,
        };
        let mut conn = PgConnection::connect(&self.url).await.map_err(err)?;
        let inserted = Self::write_table(&mut conn, table).await.map_err(err)?;
        conn.close().await.map_err(err)?;
        Ok(inserted)
    }

    async fn write_table(conn: &mut PgConnection, table: &Table) -> Result<u64, sqlx::Error> {
        let mut tx = conn.begin().await?;
        sqlx::query(&table.drop_sql()).execute(&mut *tx).await?;
        sqlx::query(&table.create_sql()).execute(&mut *tx).await?;
        let mut inserted = 0;
        for chunk in table.rows.chunks(table.rows_per_insert()) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(table.insert_prefix());
            qb.push_values(chunk, |mut b, row| {
                for cell in row {
                    match cell {
                        Cell::Text(v) => {
                            b.push_bind(v.clone());
                        }
                        Cell::Date(d) => {
                            b.push_bind(d.to_string()).push_unseparated("::date");
                        }
                        Cell::Double(x) => {
                            b.push_bind(*x);
                        }
                    }
                }
            });
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Run the ALTER statement on a fresh connection.  It is committed right
    /// away, so a later failure doesn't undo it.
    pub async fn add_constraint(&self, constraint: &Constraint) -> Result<(), LoadError> {
        let err = |source| LoadError::Constraint {
            constraint: constraint.name().to_string(),
            source,
        };
        let mut conn = PgConnection::connect(&self.url).await.map_err(err)?;
        sqlx::query(&constraint.sql())
            .execute(&mut conn)
            .await
            .map_err(err)?;
        conn.close().await.map_err(err)?;
        Ok(())
    }
}

/// Replace all the tables, then add the primary keys and the foreign keys.
/// Stops at the first error.
pub async fn rebuild_schema(store: &PgStore, tables: &[Table]) -> Result<(), LoadError> {
    for table in tables {
        info!("Creating table={} ...", table.qualified_name());
        let n = store.replace_table(table).await?;
        info!("  inserted {} rows", n);
    }
    info!("Creating primary keys ...");
    for constraint in primary_keys() {
        store.add_constraint(&constraint).await?;
        info!("  constraint={}", constraint.name());
    }
    info!("Creating foreign keys ...");
    for constraint in foreign_keys() {
        store.add_constraint(&constraint).await?;
        info!("  constraint={}", constraint.name());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::error::Error;
    use std::path::Path;

    use jiff::civil::date;

    use super::*;

    fn sample() -> Table {
        Table {
            name: "contratos",
            columns: vec![
                ("fecha", SqlType::Date),
                ("agente", SqlType::Text),
                ("precio_ponderado_$/kwh", SqlType::Double),
            ],
            rows: vec![
                vec![
                    Cell::Date(date(2025, 1, 1)),
                    Cell::Text(Some("EPMC".to_string())),
                    Cell::Double(250.5),
                ],
                vec![
                    Cell::Date(date(2025, 1, 2)),
                    Cell::Text(None),
                    Cell::Double(1.0),
                ],
            ],
        }
    }

    #[test]
    fn table_sql() {
        let table = sample();
        assert_eq!(table.drop_sql(), "DROP TABLE IF EXISTS public.contratos;");
        assert_eq!(
            table.create_sql(),
            r#"CREATE TABLE public.contratos ("fecha" DATE, "agente" TEXT, "precio_ponderado_$/kwh" DOUBLE PRECISION);"#
        );
        assert_eq!(
            table.insert_prefix(),
            r#"INSERT INTO public.contratos ("fecha", "agente", "precio_ponderado_$/kwh") "#
        );
        assert_eq!(table.rows_per_insert(), 21_845);
    }

    #[test]
    fn head() {
        let out = sample().head(1).to_string();
        assert!(out.contains("precio_ponderado_$/kwh"));
        assert!(out.contains("EPMC"));
        assert!(!out.contains("2025-01-02"));
    }

    #[test]
    fn constraint_sql() {
        let pks = primary_keys();
        assert_eq!(
            pks[0].sql(),
            "ALTER TABLE public.actividades ADD CONSTRAINT pk_actividad PRIMARY KEY (actividad);"
        );
        let fks = foreign_keys();
        assert_eq!(
            fks[3].sql(),
            "ALTER TABLE public.contratos ADD CONSTRAINT fk_contrato_tipo_mercado \
             FOREIGN KEY (tipo_mercado) REFERENCES public.tipo_mercados(tipo_mercado);"
        );
    }

    #[test]
    fn constraint_order() {
        let names: Vec<&str> = primary_keys()
            .iter()
            .chain(foreign_keys().iter())
            .map(|e| e.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "pk_actividad",
                "pk_empresa",
                "pk_agente",
                "pk_tipo_mercado",
                "fk_agente_actividad",
                "fk_agente_empresa",
                "fk_agente_agente",
                "fk_contrato_tipo_mercado",
            ]
        );
        // foreign keys only point to primary keys
        let pks: HashSet<(&str, &str)> = primary_keys()
            .into_iter()
            .map(|e| match e {
                Constraint::PrimaryKey { table, column, .. } => (table, column),
                _ => unreachable!(),
            })
            .collect();
        for fk in foreign_keys() {
            if let Constraint::ForeignKey {
                references,
                referenced_column,
                ..
            } = fk
            {
                assert!(pks.contains(&(references, referenced_column)));
            }
        }
    }

    /// Needs a Postgres database with an empty `public` schema, see `DATABASE_URL`
    /// in `.env/test.env`.
    #[ignore]
    #[tokio::test]
    async fn rebuild_twice() -> Result<(), Box<dyn Error>> {
        dotenvy::from_path(Path::new(".env/test.env"))?;
        let store = PgStore::new(&std::env::var("DATABASE_URL")?);
        let mut conn = PgConnection::connect(&std::env::var("DATABASE_URL")?).await?;
        sqlx::query(
            "DROP TABLE IF EXISTS public.contratos, public.agentes, public.empresas, \
             public.actividades, public.tipo_mercados CASCADE;",
        )
        .execute(&mut conn)
        .await?;
        conn.close().await?;

        let text = |s: &str| Cell::Text(Some(s.to_string()));
        let tables = vec![
            Table {
                name: "agentes",
                columns: vec![
                    ("agente", SqlType::Text),
                    ("empresa", SqlType::Text),
                    ("actividad", SqlType::Text),
                ],
                rows: vec![vec![text("EPMG"), text("EPM"), text("G")]],
            },
            Table {
                name: "empresas",
                columns: vec![("empresa", SqlType::Text), ("nombre_empresa", SqlType::Text)],
                rows: vec![vec![text("EPM"), text("EMPRESAS PUBLICAS DE MEDELLIN")]],
            },
            Table {
                name: "actividades",
                columns: vec![
                    ("actividad", SqlType::Text),
                    ("nombre_actividad", SqlType::Text),
                ],
                rows: vec![vec![text("G"), text("GENERACION")]],
            },
            Table {
                name: "tipo_mercados",
                columns: vec![
                    ("tipo_mercado", SqlType::Text),
                    ("nombre_tipo_mercado", SqlType::Text),
                ],
                rows: vec![vec![text("R"), text("Regulado")]],
            },
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
                rows: vec![vec![
                    Cell::Date(date(2025, 1, 1)),
                    text("EPMG"),
                    Cell::Double(10.0),
                    Cell::Double(2.0),
                    Cell::Double(20.0),
                    text("R"),
                ]],
            },
        ];

        rebuild_schema(&store, &tables).await?;
        // constraints are already there, a second run can't succeed
        assert!(rebuild_schema(&store, &tables).await.is_err());
        Ok(())
    }
}
