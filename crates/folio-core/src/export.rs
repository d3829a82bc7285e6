//! UI-facing field descriptors.
//!
//! Serializes already-compiled fields into the options document a faceted
//! search front end loads. Free text and opaque fields are never exported.

use crate::descriptor::FieldDescriptor;
use crate::dictionary::DictionaryNames;
use crate::error::Result;
use folio_common::FieldKind;
use folio_config::CompilerConfig;
use folio_store::{OrderBy, Predicate, Projection, RelationalStore, Select, Statement, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One dictionary entry offered as a facet value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryDescription {
    pub dbcode: String,
    pub name: String,
    pub shortname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Categories {
    /// Keyed by identifier.
    pub descriptions: BTreeMap<String, CategoryDescription>,
    /// Identifiers in ascending order, most frequent first.
    pub sort_order: Vec<String>,
}

/// Exported descriptor of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiDescriptor {
    #[serde(rename = "type")]
    pub datatype: FieldKind,
    pub dbfield: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<[Value; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<[Value; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categorical: Option<Categories>,
}

/// Default query the front end opens with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultSearch {
    pub time_measure: String,
}

/// The whole options document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub default_search: Vec<DefaultSearch>,
    pub ui_components: Vec<UiDescriptor>,
}

impl FieldDescriptor {
    /// Export this field for the UI, or `None` for free text and opaque
    /// fields.
    pub fn export_descriptor(
        &self,
        store: &dyn RelationalStore,
        cfg: &CompilerConfig,
    ) -> Result<Option<UiDescriptor>> {
        let mut out = UiDescriptor {
            datatype: self.kind(),
            dbfield: self.field().to_string(),
            name: self.definition().display_name().to_string(),
            unit: None,
            range: None,
            initial: None,
            categorical: None,
        };

        match self.kind() {
            FieldKind::Text | FieldKind::Other => return Ok(None),
            FieldKind::Time => {
                let range = self.time_range(store)?;
                out.unit = Some(self.field().to_string());
                out.range = Some(range.clone());
                out.initial = Some(range);
            }
            FieldKind::Categorical => {
                out.dbfield = self.alias();
                out.categorical = Some(self.top_categories(store, cfg)?);
            }
            FieldKind::Integer | FieldKind::Decimal => {}
        }
        Ok(Some(out))
    }

    /// Min and max of strictly positive values.
    fn time_range(&self, store: &dyn RelationalStore) -> Result<[Value; 2]> {
        let rows = store.execute(&Statement::Select(
            Select::from(self.durable_table())
                .project(Projection::Min {
                    column: self.field().to_string(),
                    alias: "min".into(),
                })
                .project(Projection::Max {
                    column: self.field().to_string(),
                    alias: "max".into(),
                })
                .filter(Predicate::gt(self.field(), 0i64)),
        ))?;
        let min = rows.get(0, "min").cloned().unwrap_or(Value::Null);
        let max = rows.get(0, "max").cloned().unwrap_or(Value::Null);
        Ok([min, max])
    }

    fn top_categories(&self, store: &dyn RelationalStore, cfg: &CompilerConfig) -> Result<Categories> {
        let names = DictionaryNames::for_field(self.field());
        let rows = store.execute(&Statement::Select(
            Select::from(&names.table)
                .columns([names.value_column.clone(), names.id_column.clone()])
                .filter(Predicate::gt(&names.count_column, cfg.export_min_count))
                .order_by(OrderBy::asc(&names.id_column))
                .limit(cfg.export_max_entries),
        ))?;

        let mut categories = Categories {
            descriptions: BTreeMap::new(),
            sort_order: Vec::with_capacity(rows.len()),
        };
        for row in &rows.rows {
            let name = row[0].to_string();
            let code = row[1].to_string();
            categories.sort_order.push(code.clone());
            categories.descriptions.insert(
                code.clone(),
                CategoryDescription {
                    dbcode: code,
                    shortname: name.clone(),
                    name,
                },
            );
        }
        debug!(field = self.field(), entries = categories.sort_order.len(), "categories exported");
        Ok(categories)
    }
}

/// Collect every exportable field into one options document. The first time
/// field becomes the default time measure.
pub fn export_ui_components(
    fields: &[FieldDescriptor],
    store: &dyn RelationalStore,
    cfg: &CompilerConfig,
) -> Result<UiOptions> {
    let mut ui_components = Vec::new();
    for field in fields {
        if let Some(descriptor) = field.export_descriptor(store, cfg)? {
            ui_components.push(descriptor);
        }
    }

    let default_search = match fields.iter().find(|f| f.kind() == FieldKind::Time) {
        Some(time) => vec![DefaultSearch {
            time_measure: time.field().to_string(),
        }],
        None => {
            warn!("no time field; the options document has no default search");
            Vec::new()
        }
    };
    Ok(UiOptions {
        default_search,
        ui_components,
    })
}
