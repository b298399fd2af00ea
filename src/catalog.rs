//! The dataset catalog: a tabular index of published grid locations,
//! and the resolver that turns a batch of download requests into as few
//! catalog queries as possible.
//!
//! Catalog records are keyed by the usual model-output facets
//! (experiment, table/frequency, variable, run, source/model) plus the
//! location string used to open the store. A batch of [`DownloadSpec`]s
//! is folded into one [`CatalogQuery`]: facets with a single value
//! across the batch become AND-ed equality predicates, facets that vary
//! become OR groups, so one query covers the whole batch instead of one
//! query per variable.

use std::path::Path;

use error_stack::ResultExt;
use indexmap::IndexMap;

/// One requested variable, expressed with explicit fields rather than
/// a loosely-keyed parameter mapping.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DownloadSpec {
    /// Variable identifier, e.g. "tas" or "pr".
    pub variable: String,
    /// Table / frequency identifier, e.g. "Amon" or "day".
    pub table: String,
    /// Experiment identifier, e.g. "historical" or "ssp585".
    pub experiment: String,
    /// Run (ensemble member) identifier, e.g. "r1i1p1f1".
    pub run: String,
    /// Source (model) identifier; `None` matches any source.
    #[serde(default)]
    pub source: Option<String>,
}

/// The facet names used by catalog records and queries.
pub const FACET_VARIABLE: &str = "variable_id";
pub const FACET_TABLE: &str = "table_id";
pub const FACET_EXPERIMENT: &str = "experiment_id";
pub const FACET_RUN: &str = "member_id";
pub const FACET_SOURCE: &str = "source_id";

/// A catalog selection: equality predicates (AND) plus multi-value
/// predicates (OR within a facet, AND across facets). Facet order is
/// preserved for readable logs and reproducible query rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogQuery {
    pub fixed: IndexMap<String, String>,
    pub varied: IndexMap<String, Vec<String>>,
}

impl CatalogQuery {
    /// True if the record satisfies every predicate.
    pub fn matches(&self, record: &CatalogRecord) -> bool {
        self.fixed
            .iter()
            .all(|(facet, want)| record.facet(facet) == Some(want.as_str()))
            && self.varied.iter().all(|(facet, wants)| {
                record
                    .facet(facet)
                    .map(|v| wants.iter().any(|w| w == v))
                    .unwrap_or(false)
            })
    }
}

impl std::fmt::Display for CatalogQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = vec![];
        for (facet, value) in &self.fixed {
            parts.push(format!("{facet} == '{value}'"));
        }
        for (facet, values) in &self.varied {
            parts.push(format!("{facet} in {values:?}"));
        }
        write!(f, "{}", parts.join(" and "))
    }
}

/// Fold a batch of download requests into a single query.
///
/// A facet every request agrees on becomes an equality predicate; a
/// facet with differing values becomes an OR group. The source facet is
/// only constrained when every request names a source, since an
/// unconstrained request must keep matching all of them.
pub fn resolve_query(specs: &[DownloadSpec]) -> CatalogQuery {
    let mut by_facet: IndexMap<&str, Vec<String>> = IndexMap::new();
    let mut source_wildcard = false;
    for spec in specs {
        let mut fields = vec![
            (FACET_VARIABLE, Some(spec.variable.clone())),
            (FACET_TABLE, Some(spec.table.clone())),
            (FACET_EXPERIMENT, Some(spec.experiment.clone())),
            (FACET_RUN, Some(spec.run.clone())),
            (FACET_SOURCE, spec.source.clone()),
        ];
        for (facet, value) in fields.drain(..) {
            match value {
                Some(v) => {
                    let values = by_facet.entry(facet).or_default();
                    if !values.contains(&v) {
                        values.push(v);
                    }
                }
                None => source_wildcard = true,
            }
        }
    }
    if source_wildcard && by_facet.shift_remove(FACET_SOURCE).is_some() {
        // One wildcard request unconstrains the facet entirely
        log::debug!(
            "A download request has no source constraint, dropping {FACET_SOURCE} from the query"
        );
    }

    let mut query = CatalogQuery::default();
    for (facet, values) in by_facet {
        if values.len() == 1 {
            query
                .fixed
                .insert(facet.to_owned(), values.into_iter().next().expect("len 1"));
        } else if !values.is_empty() {
            query.varied.insert(facet.to_owned(), values);
        }
    }
    query
}

/// One row of the catalog: the facet values plus the location string
/// used to open the store it points at.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CatalogRecord {
    pub variable_id: String,
    pub table_id: String,
    pub experiment_id: String,
    pub member_id: String,
    pub source_id: String,
    /// Store location, resolved by a `GridSource` implementation.
    pub location: String,
}

impl CatalogRecord {
    /// Look up a facet value by its column name.
    pub fn facet(&self, name: &str) -> Option<&str> {
        match name {
            FACET_VARIABLE => Some(&self.variable_id),
            FACET_TABLE => Some(&self.table_id),
            FACET_EXPERIMENT => Some(&self.experiment_id),
            FACET_RUN => Some(&self.member_id),
            FACET_SOURCE => Some(&self.source_id),
            _ => None,
        }
    }

    /// A short human-readable identifier for logs.
    pub fn id(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.source_id, self.experiment_id, self.table_id, self.variable_id, self.member_id
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Could not read catalog index at {}", .0.display())]
    CouldNotRead(std::path::PathBuf),
    #[error("Catalog index at {} is not a JSON array of records", .0.display())]
    BadFormat(std::path::PathBuf),
}

/// A catalog backed by a JSON document: an array of records with the
/// facet column names as keys. This is the form produced by exporting
/// the usual cloud catalog index.
pub struct JsonCatalog {
    records: Vec<CatalogRecord>,
}

impl JsonCatalog {
    pub fn open(path: &Path) -> error_stack::Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)
            .change_context_lazy(|| CatalogError::CouldNotRead(path.to_path_buf()))?;
        let records: Vec<CatalogRecord> = serde_json::from_str(&text)
            .change_context_lazy(|| CatalogError::BadFormat(path.to_path_buf()))?;
        log::info!(
            "Loaded catalog index with {} records from {}",
            records.len(),
            path.display()
        );
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<CatalogRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Anything that can answer a [`CatalogQuery`] with matching records.
pub trait Catalog {
    fn search(&self, query: &CatalogQuery) -> Vec<CatalogRecord>;
}

impl Catalog for JsonCatalog {
    fn search(&self, query: &CatalogQuery) -> Vec<CatalogRecord> {
        self.records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect()
    }
}
