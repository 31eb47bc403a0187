//! Translation between engine records and OData entity bodies

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

use playbook_core::domain::record::{NewNodeRecord, NodeAttributes, RecordPatch};
use playbook_core::{PersistedNodeRecord, RecordId, RecordQuery, Relation, StoreError, StoreResult};

use crate::config::ODataStoreConfig;

/// Literal for a key in `$filter` or an entity path: GUIDs bare, anything else quoted
pub(crate) fn key_literal(raw: &str) -> String {
    if Uuid::parse_str(raw).is_ok() {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', "''"))
    }
}

/// `$filter`, `$select` and `$expand` parameters for a record query
pub(crate) fn query_params(config: &ODataStoreConfig, query: &RecordQuery) -> Vec<(&'static str, String)> {
    let fields = &config.fields;
    let mut filter = format!(
        "{} eq {}",
        fields.playbook_filter,
        key_literal(&query.playbook_id.0)
    );
    if let Some(extra) = &query.filter {
        filter = format!("{} and ({})", filter, extra);
    }

    let select = if query.select.is_empty() {
        [
            &fields.id,
            &fields.execution_order,
            &fields.payload,
            &fields.client_ref,
            &fields.depends_on,
        ]
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
    } else {
        query.select.join(",")
    };

    let mut params = vec![("$filter", filter), ("$select", select)];
    if !query.expand.is_empty() {
        let expand = query
            .expand
            .iter()
            .map(|relation| {
                let endpoint = config.relation(*relation);
                format!("{}($select={})", endpoint.navigation, endpoint.key)
            })
            .collect::<Vec<_>>()
            .join(",");
        params.push(("$expand", expand));
    }
    params
}

/// `set(key)` addressing one entity
pub(crate) fn entity_path(set: &str, id: &str) -> String {
    format!("{}({})", set, key_literal(id))
}

fn bind(set: &str, id: &str) -> Value {
    Value::from(format!("/{}", entity_path(set, id)))
}

fn write_attributes(config: &ODataStoreConfig, attributes: &NodeAttributes, body: &mut Map<String, Value>) {
    let fields = &config.fields;
    body.insert(fields.name.clone(), Value::from(attributes.name.as_str()));
    body.insert(fields.node_type.clone(), Value::from(attributes.node_type.as_str()));
    body.insert(fields.position_x.clone(), Value::from(attributes.position_x));
    body.insert(fields.position_y.clone(), Value::from(attributes.position_y));
    body.insert(
        fields.output_variable.clone(),
        attributes
            .output_variable
            .as_deref()
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    if let Some(action_id) = &attributes.action_id {
        body.insert(
            format!("{}@odata.bind", fields.action_bind),
            bind(&config.action_entity_set, action_id),
        );
    }
    if let Some(tool_id) = &attributes.tool_id {
        body.insert(
            format!("{}@odata.bind", fields.tool_bind),
            bind(&config.tool_entity_set, tool_id),
        );
    }
}

/// Body of the `POST` creating a node record
pub(crate) fn create_body(config: &ODataStoreConfig, record: &NewNodeRecord) -> Value {
    let fields = &config.fields;
    let mut body = Map::new();
    body.insert(
        format!("{}@odata.bind", fields.playbook_bind),
        bind(&config.playbook_entity_set, &record.playbook_id.0),
    );
    body.insert(fields.execution_order.clone(), Value::from(record.execution_order));
    body.insert(fields.payload.clone(), Value::from(record.payload.as_str()));
    body.insert(fields.client_ref.clone(), Value::from(record.client_ref.as_str()));
    write_attributes(config, &record.attributes, &mut body);
    Value::Object(body)
}

/// Body of the `PATCH` applying a partial update.
///
/// A cleared dependency list is written as an explicit `null`.
pub(crate) fn patch_body(config: &ODataStoreConfig, patch: &RecordPatch) -> Value {
    let fields = &config.fields;
    let mut body = Map::new();
    if let Some(order) = patch.execution_order {
        body.insert(fields.execution_order.clone(), Value::from(order));
    }
    if let Some(payload) = &patch.payload {
        body.insert(fields.payload.clone(), Value::from(payload.as_str()));
    }
    if let Some(client_ref) = &patch.client_ref {
        body.insert(fields.client_ref.clone(), Value::from(client_ref.as_str()));
    }
    if let Some(attributes) = &patch.attributes {
        write_attributes(config, attributes, &mut body);
    }
    if let Some(update) = &patch.depends_on {
        body.insert(
            fields.depends_on.clone(),
            update.encode().map(Value::from).unwrap_or(Value::Null),
        );
    }
    Value::Object(body)
}

fn string_field(row: &Map<String, Value>, name: &str) -> Option<String> {
    row.get(name).and_then(Value::as_str).map(str::to_string)
}

fn related_ids(row: &Map<String, Value>, navigation: &str, key: &str) -> BTreeSet<String> {
    row.get(navigation)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(key).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Decode one entity of a query response
pub(crate) fn parse_record(config: &ODataStoreConfig, row: &Value) -> StoreResult<PersistedNodeRecord> {
    let fields = &config.fields;
    let row = row
        .as_object()
        .ok_or_else(|| StoreError::Serialization("entity is not an object".to_string()))?;
    let id = string_field(row, &fields.id).ok_or_else(|| {
        StoreError::Serialization(format!("entity is missing '{}'", fields.id))
    })?;

    let execution_order = row
        .get(&fields.execution_order)
        .and_then(Value::as_u64)
        .and_then(|order| u32::try_from(order).ok())
        .unwrap_or(0);

    let mut record = PersistedNodeRecord {
        id: RecordId(id),
        execution_order,
        payload: string_field(row, &fields.payload).unwrap_or_default(),
        client_ref: string_field(row, &fields.client_ref),
        skill_ids: BTreeSet::new(),
        knowledge_ids: BTreeSet::new(),
        depends_on: string_field(row, &fields.depends_on),
    };
    for relation in Relation::ALL {
        let endpoint = config.relation(relation);
        *record.associated_mut(relation) = related_ids(row, &endpoint.navigation, &endpoint.key);
    }
    Ok(record)
}

/// One page of a collection response
#[derive(Debug)]
pub(crate) struct Page {
    pub records: Vec<PersistedNodeRecord>,
    /// `@odata.nextLink` of the page, absent on the last one
    pub next_link: Option<String>,
}

/// Decode a `{"value": [...], "@odata.nextLink": "..."}` collection page
pub(crate) fn parse_page(config: &ODataStoreConfig, body: &Value) -> StoreResult<Page> {
    let records = body
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Serialization("response has no 'value' array".to_string()))?
        .iter()
        .map(|row| parse_record(config, row))
        .collect::<StoreResult<Vec<_>>>()?;
    let next_link = body
        .get("@odata.nextLink")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Page { records, next_link })
}

/// Key inside an `OData-EntityId` header such as `https://host/api/playbooknodes(1234)`
pub(crate) fn entity_id_from_header(header: &str) -> Option<RecordId> {
    let open = header.rfind('(')?;
    let close = header[open..].find(')')? + open;
    let key = &header[open + 1..close];
    let key = match key.strip_prefix('\'').and_then(|k| k.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => key.to_string(),
    };
    if key.is_empty() {
        None
    } else {
        Some(RecordId(key))
    }
}
