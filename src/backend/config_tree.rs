//! Hierarchical XML configuration documents, one table per entity kind

use super::{match_table_name, BackendKind, Capabilities, ConnectionDescriptor, TableAdapter};
use crate::cancel::CancellationToken;
use crate::data::{ColumnDescriptor, ColumnType, TableSnapshot, Value};
use crate::error::{ReconError, Result};
use crate::stabilizer::{Document, Entity, EntityKind, KeyStabilizer};
use indexmap::IndexSet;
use roxmltree::Node;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BACKEND: &str = "config";

/// Columns every entity table starts with
pub const FIXED_COLUMNS: [&str; 4] = ["Key", "Type", "Parent", "Channel"];

const TABLES: [EntityKind; 3] = [EntityKind::Device, EntityKind::Module, EntityKind::Net];

#[derive(Debug, Default)]
pub struct ConfigTreeAdapter;

impl ConfigTreeAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn document_files(location: &Path) -> Result<Vec<PathBuf>> {
    if location.is_file() {
        return Ok(vec![location.to_path_buf()]);
    }
    if !location.is_dir() {
        return Err(ReconError::backend_unavailable(
            BACKEND,
            format!("'{}' not found", location.display()),
            "Point the connection at an XML configuration file or a folder of them",
        ));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(location).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let is_xml = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_xml {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

fn entity_kind(tag: &str) -> Option<EntityKind> {
    match tag {
        "Device" => Some(EntityKind::Device),
        "Module" => Some(EntityKind::Module),
        "Net" => Some(EntityKind::Net),
        _ => None,
    }
}

fn attribute(node: Node, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

fn collect_entities(node: Node, owner: Option<usize>, enclosing_net: Option<&str>, out: &mut Vec<Entity>) {
    for child in node.children().filter(Node::is_element) {
        let Some(kind) = entity_kind(child.tag_name().name()) else {
            continue;
        };
        let name = child.attribute("name").unwrap_or_default();
        let mut entity = Entity::new(kind, name, child.attribute("type").unwrap_or_default());
        entity.address = attribute(child, "address");
        entity.channel = attribute(child, "channel");
        for attr in child
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "Attribute")
        {
            if let Some(attr_name) = attr.attribute("name") {
                entity
                    .attributes
                    .insert(attr_name.to_string(), attr.attribute("value").unwrap_or_default().to_string());
            }
        }
        match kind {
            EntityKind::Module => entity.owner = owner,
            EntityKind::Net => {
                entity.parent = attribute(child, "parent").or_else(|| enclosing_net.map(str::to_string))
            }
            EntityKind::Device => {}
        }

        let index = out.len();
        out.push(entity);
        match kind {
            EntityKind::Net => collect_entities(child, owner, Some(name), out),
            _ => collect_entities(child, Some(index), enclosing_net, out),
        }
    }
}

/// Parse one configuration document into its entity list
pub fn parse_document(text: &str) -> Result<Document> {
    let xml = roxmltree::Document::parse(text)?;
    let root = xml.root_element();
    let object_name = match root.tag_name().name() {
        "Object" => attribute(root, "name"),
        _ => None,
    };
    let mut entities = Vec::new();
    collect_entities(root, None, None, &mut entities);
    Ok(Document {
        object_name,
        entities,
    })
}

/// Every document under a file or folder location
pub fn load_documents(location: &Path) -> Result<Vec<Document>> {
    document_files(location)?
        .into_iter()
        .map(|path| {
            let text = fs::read_to_string(&path)?;
            parse_document(&text).map_err(|err| {
                ReconError::data_processing(format!("Failed to parse '{}': {}", path.display(), err))
            })
        })
        .collect()
}

fn optional_text(value: Option<&str>) -> Value {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Value::Text(text.to_string()),
        _ => Value::Null,
    }
}

/// Build the comparison table for one entity kind across documents
pub fn entity_table(documents: &[Document], kind: EntityKind, cancel: &CancellationToken) -> Result<TableSnapshot> {
    let mut attribute_names: IndexSet<String> = IndexSet::new();
    for document in documents {
        for entity in document.entities.iter().filter(|e| e.kind == kind) {
            attribute_names.extend(entity.attributes.keys().cloned());
        }
    }

    let columns = FIXED_COLUMNS
        .iter()
        .map(|name| name.to_string())
        .chain(attribute_names.iter().cloned())
        .map(|name| ColumnDescriptor::new(name, ColumnType::Text))
        .collect();
    let mut snapshot = TableSnapshot::new(columns);

    for document in documents {
        let stable = KeyStabilizer::new(document.object_name.clone()).stabilize(document);
        for (entity, keyed) in document.entities.iter().zip(stable) {
            cancel.check()?;
            if entity.kind != kind {
                continue;
            }
            let mut row = vec![
                Value::Text(keyed.key),
                optional_text(Some(&entity.entity_type)),
                optional_text(keyed.parent_key.as_deref()),
                optional_text(entity.channel.as_deref()),
            ];
            row.extend(
                attribute_names
                    .iter()
                    .map(|name| optional_text(entity.attributes.get(name).map(String::as_str))),
            );
            snapshot.rows.push(row);
        }
    }
    Ok(snapshot)
}

fn resolve_kind(table: &str) -> Result<EntityKind> {
    let names: Vec<String> = TABLES.iter().map(|k| k.table_name().to_string()).collect();
    let name = match_table_name(&names, table).ok_or_else(|| ReconError::table_not_found(table))?;
    TABLES
        .into_iter()
        .find(|k| k.table_name() == name)
        .ok_or_else(|| ReconError::table_not_found(table))
}

impl TableAdapter for ConfigTreeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ConfigTree
    }

    fn list_tables(&self, conn: &ConnectionDescriptor) -> Result<Vec<String>> {
        document_files(conn.path())?;
        Ok(TABLES.iter().map(|k| k.table_name().to_string()).collect())
    }

    fn load_full_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<TableSnapshot> {
        let kind = resolve_kind(table)?;
        let documents = load_documents(conn.path())?;
        let snapshot = entity_table(&documents, kind, cancel)?;
        log::debug!(
            "Loaded {} {} entities from {} document(s)",
            snapshot.rows.len(),
            kind.table_name(),
            documents.len()
        );
        Ok(snapshot)
    }

    fn key_columns(&self, _conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>> {
        resolve_kind(table)?;
        Ok(vec![FIXED_COLUMNS[0].to_string()])
    }

    fn capabilities(&self, _conn: &ConnectionDescriptor) -> Capabilities {
        Capabilities::READ
    }
}
