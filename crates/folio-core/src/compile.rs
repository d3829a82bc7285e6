//! The compile pipeline.
//!
//! One run over one input file:
//!
//! 1. Resolve field definitions (explicit schema, or the set's registered
//!    fields plus inference over a sample for new ones)
//! 2. Stream records into durable-tier flat files, minting anchors
//! 3. Bulk-load the durable tier
//! 4. Build dictionaries, then lookups and heaps
//! 5. Register every rebuild procedure and field record
//!
//! A failure before step 3 leaves the store untouched. Volatile structures
//! written before a later failure are discarded by the next rehydration.

use crate::anchor::AnchorStore;
use crate::descriptor::{build_main_heap, main_table_def, FieldDescriptor, FieldRecord};
use crate::error::{CompileError, Result};
use crate::infer::Sampler;
use crate::ingest::{open_input, FlatFiles, IngestReport, Ingestor};
use crate::registry::Registry;
use folio_common::{AnchorId, FieldDefinition, RunId};
use folio_config::{CompilerConfig, LoadMode, TableSet};
use folio_store::{
    LoadReport, Procedure, RelationalStore, Select, Statement, StoreError, TableDef,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

/// What to compile.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// JSON-lines input.
    pub input: PathBuf,
    /// Explicit definitions; `None` samples the input and infers them.
    pub schema: Option<Vec<FieldDefinition>>,
    /// Secondary import name; `None` targets the primary set.
    pub set: Option<String>,
}

impl CompileRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            schema: None,
            set: None,
        }
    }

    pub fn with_schema(mut self, schema: Vec<FieldDefinition>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_set(mut self, set: impl Into<String>) -> Self {
        self.set = Some(set.into());
        self
    }
}

/// A rebuild procedure ready to run and register.
#[derive(Debug, Clone)]
struct Build {
    table: String,
    procedure: Procedure,
    depends_on: Vec<String>,
}

/// Summary of a compile run.
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    pub run_id: RunId,
    pub durable_table: String,
    pub heap_table: String,
    pub fields: Vec<FieldRecord>,
    pub ingest: IngestReport,
    /// Bulk-load outcome per durable table.
    pub loads: BTreeMap<String, LoadReport>,
    /// Derived tables built, in build order.
    pub built: Vec<String>,
}

impl CompileReport {
    /// Non-fatal problems: skipped records and coerced or duplicate rows.
    pub fn warnings(&self) -> u64 {
        self.ingest.skipped()
            + self
                .loads
                .values()
                .map(|l| l.coerced + l.duplicates)
                .sum::<u64>()
    }
}

/// Compiler bound to a configuration and a store.
pub struct Compiler<'a> {
    cfg: &'a CompilerConfig,
    store: &'a dyn RelationalStore,
}

impl<'a> Compiler<'a> {
    pub fn new(cfg: &'a CompilerConfig, store: &'a dyn RelationalStore) -> Self {
        Self { cfg, store }
    }

    /// Definitions for `request`.
    ///
    /// An explicit schema is taken as given. Without one, fields the set has
    /// already registered keep their registered definitions and only new
    /// fields are inferred from the first `sample_limit` records. A field
    /// name registered by another table set is refused from a schema and
    /// skipped from inference.
    pub fn resolve_definitions(&self, request: &CompileRequest) -> Result<Vec<FieldDefinition>> {
        let set = self.cfg.table_set(request.set.as_deref());
        let registered = Registry::new(self.store).fields()?;
        let foreign_owner = |field: &str| {
            registered
                .iter()
                .find(|r| r.dbname == field && r.durable != set.durable)
                .map(|r| r.durable.clone())
        };

        if let Some(schema) = &request.schema {
            if let Some((field, owner)) = schema
                .iter()
                .find_map(|d| foreign_owner(&d.field).map(|owner| (d.field.clone(), owner)))
            {
                return Err(folio_common::Error::FieldOwnedByOtherSet { field, owner }.into());
            }
            return Ok(schema.clone());
        }

        let mut known: Vec<FieldDefinition> = registered
            .iter()
            .filter_map(|r| r.definition_for(&set))
            .collect();
        let mut sampler = Sampler::new(&self.cfg.key_field, self.cfg.sample_limit);
        sampler.read(open_input(&request.input)?)?;

        let mut defs = Vec::new();
        let mut inferred = 0;
        for def in sampler.infer(self.cfg.categorical_threshold, &self.cfg.reserved_names()) {
            if let Some(pos) = known.iter().position(|k| k.field == def.field) {
                let kept = known.remove(pos);
                if kept.datatype != def.datatype || kept.unique != def.unique {
                    debug!(
                        field = %kept.field,
                        registered = %kept.datatype,
                        sampled = %def.datatype,
                        "keeping registered definition"
                    );
                }
                defs.push(kept);
            } else if let Some(owner) = foreign_owner(&def.field) {
                warn!(field = %def.field, owner = %owner, "field belongs to another table set, skipped");
            } else {
                inferred += 1;
                defs.push(def);
            }
        }
        // Registered fields absent from this sample still belong to the set.
        defs.extend(known);
        info!(
            records = sampler.records(),
            fields = defs.len(),
            inferred,
            "field definitions resolved"
        );
        Ok(defs)
    }

    /// Descriptors for `defs` attached to `set`.
    pub fn descriptors(&self, defs: Vec<FieldDefinition>, set: &TableSet) -> Result<Vec<FieldDescriptor>> {
        if defs.is_empty() {
            return Err(CompileError::NoFields);
        }
        defs.into_iter()
            .map(|d| FieldDescriptor::new(d, self.cfg, set))
            .collect()
    }

    /// Run the whole pipeline.
    pub fn compile(&self, request: &CompileRequest, anchors: &mut AnchorStore) -> Result<CompileReport> {
        let run_id = RunId::new();
        let _span = info_span!("compile", run_id = %run_id).entered();
        let set = self.cfg.table_set(request.set.as_deref());

        let fields = self.descriptors(self.resolve_definitions(request)?, &set)?;
        let loaded = self.loaded_anchors(&set)?;
        let (ingest, files) = Ingestor::new(&set, &self.cfg.key_field, &fields, self.cfg.flat_dir())
            .with_row_limit(self.cfg.row_limit)
            .with_loaded(&loaded)
            .run(open_input(&request.input)?, anchors)?;

        let loads = self.load_durable(&set, &fields, &files)?;
        let built = self.build_volatile(&set, &fields)?;

        let report = CompileReport {
            run_id,
            durable_table: set.durable.clone(),
            heap_table: set.heap.clone(),
            fields: fields.iter().map(FieldDescriptor::metadata_record).collect(),
            ingest,
            loads,
            built,
        };
        info!(
            table = %report.durable_table,
            fields = report.fields.len(),
            built = report.built.len(),
            warnings = report.warnings(),
            "compile complete"
        );
        Ok(report)
    }

    /// Anchors already in the set's main table. Replace mode drops the table
    /// before loading, so none count.
    fn loaded_anchors(&self, set: &TableSet) -> Result<HashSet<AnchorId>> {
        if self.cfg.load_mode == LoadMode::Replace {
            return Ok(HashSet::new());
        }
        let rows = match self.store.execute(&Statement::Select(
            Select::from(&set.durable).columns([self.cfg.anchor_field.clone()]),
        )) {
            Ok(rows) => rows,
            Err(StoreError::TableNotFound(_)) => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.first()?.as_i64())
            .filter_map(|id| u32::try_from(id).ok())
            .map(AnchorId::from)
            .collect())
    }

    fn define(&self, def: &TableDef) -> Result<()> {
        if self.cfg.load_mode == LoadMode::Replace {
            self.store.drop_table(&def.name)?;
        }
        self.store.define_table(def)?;
        Ok(())
    }

    fn load(&self, def: &TableDef, source: &Path) -> Result<LoadReport> {
        let report = self.store.bulk_load(&def.name, source, &def.column_names())?;
        debug!(table = %def.name, rows = report.rows, "durable table loaded");
        Ok(report)
    }

    /// Define and bulk-load the main table and every satellite.
    pub fn load_durable(
        &self,
        set: &TableSet,
        fields: &[FieldDescriptor],
        files: &FlatFiles,
    ) -> Result<BTreeMap<String, LoadReport>> {
        let mut loads = BTreeMap::new();
        let main = main_table_def(set, self.cfg, fields)?;
        self.define(&main)?;
        loads.insert(main.name.clone(), self.load(&main, &files.main)?);

        for field in fields {
            let (Some(def), Some(source)) = (field.disk_table_def(), files.satellites.get(field.field()))
            else {
                continue;
            };
            self.define(&def)?;
            loads.insert(def.name.clone(), self.load(&def, source)?);
        }
        Ok(loads)
    }

    /// Build and register every dictionary, lookup and heap of the set.
    /// Returns the derived tables in build order.
    pub fn build_volatile(&self, set: &TableSet, fields: &[FieldDescriptor]) -> Result<Vec<String>> {
        let registry = Registry::new(self.store);
        registry.ensure_tables()?;

        let per_field = if self.cfg.parallel_builds > 1 && fields.len() > 1 {
            self.build_fields_parallel(fields)?
        } else {
            fields
                .iter()
                .map(|f| self.build_field(f))
                .collect::<Result<Vec<_>>>()?
        };

        let mut built = Vec::new();
        for (field, builds) in fields.iter().zip(per_field) {
            for build in builds {
                registry.register(&build.table, &build.procedure, &build.depends_on, &[])?;
                built.push(build.table);
            }
            registry.register_field(&field.metadata_record())?;
        }

        // The heap joins every dictionary, so it goes last.
        let (procedure, depends_on) = build_main_heap(set, self.cfg, fields, self.store)?;
        self.store.run(&procedure)?;
        registry.register(&set.heap, &procedure, &depends_on, &[])?;
        built.push(set.heap.clone());
        Ok(built)
    }

    /// Dictionary, then lookup, then heap for one field.
    fn build_field(&self, field: &FieldDescriptor) -> Result<Vec<Build>> {
        let mut builds = Vec::new();
        let Some(dictionary) = field.build_dictionary() else {
            return Ok(builds);
        };
        self.store.run(&dictionary)?;
        builds.push(Build {
            table: field.dictionary_table(),
            procedure: dictionary,
            depends_on: vec![field.durable_table()],
        });

        if let Some(lookup) = field.build_volatile_lookup(self.store)? {
            self.store.run(&lookup)?;
            builds.push(Build {
                table: field.lookup_table(),
                procedure: lookup,
                depends_on: vec![field.dictionary_table()],
            });
        }
        if let Some(heap) = field.build_volatile_heap(self.store)? {
            self.store.run(&heap)?;
            builds.push(Build {
                table: field.heap_table(),
                procedure: heap,
                depends_on: field.volatile_dependencies(),
            });
        }
        debug!(
            field = field.field(),
            width = ?field.cached_id_width(),
            tables = builds.len(),
            "field structures built"
        );
        Ok(builds)
    }

    /// Fields are independent once the durable tier is loaded; each thread
    /// builds its fields' chains in order.
    fn build_fields_parallel(&self, fields: &[FieldDescriptor]) -> Result<Vec<Vec<Build>>> {
        let workers = self.cfg.parallel_builds.min(fields.len());
        let chunk = fields.len().div_ceil(workers);
        info!(workers, fields = fields.len(), "building fields in parallel");

        std::thread::scope(|s| {
            let handles: Vec<_> = fields
                .chunks(chunk)
                .map(|group| {
                    s.spawn(move || {
                        group
                            .iter()
                            .map(|f| self.build_field(f))
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();

            let mut out = Vec::with_capacity(fields.len());
            for handle in handles {
                match handle.join() {
                    Ok(builds) => out.extend(builds?),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Ok::<_, CompileError>(out)
        })
    }
}
