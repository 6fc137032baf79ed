//! Texts of the queries issued by the painter.
//!
//! Directives are stored as `MetaData` nodes attached to the trait they
//! govern. The node's predicate is the start or stop term, and its
//! `measurement` holds the anchor page id as a string.

use super::directive::Directive;

/// Expression extracting the anchor page id from a directive node.
fn page_id_of(node: &str) -> String {
    format!("toInteger({node}.measurement)")
}

/// Quote `text` as a string literal.
pub(crate) fn literal(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Directives of one kind: trait, kind label, anchor, its name, its parent.
pub(crate) fn show_directives(resource: u64, predicate: &str, label: &str) -> String {
    format!(
        "WITH {label} AS tag
         MATCH (r:Resource {{resource_id: {resource}}})<-[:supplier]-
               (t:Trait)-[:metadata]->
               (m:MetaData)-[:predicate]->
               (:Term {{uri: {predicate}}}),
               (p:Page)-[:trait]->(t)
         WITH p, t, {point_id} AS point_id, tag
         MATCH (point:Page {{page_id: point_id}})
         OPTIONAL MATCH (point)-[:parent]->(parent:Page)
         RETURN t.resource_pk, tag, point_id, point.canonical, parent.page_id
         ORDER BY t.resource_pk, point_id
         LIMIT 10000",
        label = literal(label),
        predicate = literal(predicate),
        point_id = page_id_of("m"),
    )
}

/// Anchors of one kind that are missing or have no parent:
/// anchor id, id of the page found (or null), its name.
pub(crate) fn qc_presence(resource: u64, predicate: &str) -> String {
    format!(
        "MATCH (:Resource {{resource_id: {resource}}})<-[:supplier]-
               (:Trait)-[:metadata]->
               (m:MetaData)-[:predicate]->
               (:Term {{uri: {predicate}}})
         WITH DISTINCT {point_id} AS point_id
         OPTIONAL MATCH (point:Page {{page_id: point_id}})
         OPTIONAL MATCH (point)-[:parent]->(parent:Page)
         WITH point_id, point, parent
         WHERE parent IS NULL
         RETURN point_id, point.page_id, point.canonical
         ORDER BY point_id
         LIMIT 1000",
        predicate = literal(predicate),
        point_id = page_id_of("m"),
    )
}

/// Stop anchors that are not below any start anchor of the same trait:
/// anchor id, its name, the trait.
pub(crate) fn qc_stop_under_start(resource: u64, starts_at: &str, stops_at: &str) -> String {
    format!(
        "MATCH (:Resource {{resource_id: {resource}}})<-[:supplier]-
               (t:Trait)-[:metadata]->
               (m2:MetaData)-[:predicate]->
               (:Term {{uri: {stops_at}}})
         WITH t, {stop_id} AS stop_id
         MATCH (stop:Page {{page_id: stop_id}})
         OPTIONAL MATCH (t)-[:metadata]->
               (m1:MetaData)-[:predicate]->
               (:Term {{uri: {starts_at}}})
         WITH t, stop_id, stop, collect({start_id}) AS start_ids
         OPTIONAL MATCH path = (stop)-[:parent*1..]->(start:Page)
         WHERE start.page_id IN start_ids
         WITH t, stop_id, stop, count(path) AS covering
         WHERE covering = 0
         RETURN stop_id, stop.canonical, t.eol_pk
         ORDER BY stop_id, t.eol_pk
         LIMIT 1000",
        starts_at = literal(starts_at),
        stops_at = literal(stops_at),
        stop_id = page_id_of("m2"),
        start_id = page_id_of("m1"),
    )
}

/// Proper descendants of every start anchor, with the trait's payload:
/// page, trait, page name, measurement, object term name.
pub(crate) fn assert_descendants(resource: u64, starts_at: &str) -> String {
    format!(
        "MATCH (:Resource {{resource_id: {resource}}})<-[:supplier]-
               (t:Trait)-[:metadata]->
               (m:MetaData)-[:predicate]->
               (:Term {{uri: {starts_at}}})
         OPTIONAL MATCH (t)-[:object_term]->(o:Term)
         WITH t, {start_id} AS start_id, o
         MATCH (:Page {{page_id: start_id}})<-[:parent*1..]-(d:Page)
         RETURN d.page_id AS page, t.eol_pk AS trait, d.canonical, t.measurement, o.name",
        starts_at = literal(starts_at),
        start_id = page_id_of("m"),
    )
}

/// Every stop anchor and all its descendants: page, trait.
pub(crate) fn retract_descendants(resource: u64, stops_at: &str) -> String {
    format!(
        "MATCH (:Resource {{resource_id: {resource}}})<-[:supplier]-
               (t:Trait)-[:metadata]->
               (m:MetaData)-[:predicate]->
               (:Term {{uri: {stops_at}}})
         WITH t, {stop_id} AS stop_id
         MATCH (stop:Page {{page_id: stop_id}})
         WITH stop, t
         MATCH (stop)<-[:parent*0..]-(d:Page)
         RETURN d.page_id AS page, t.eol_pk AS trait",
        stops_at = literal(stops_at),
        stop_id = page_id_of("m"),
    )
}

/// Number of inferred trait relationships of a resource.
pub(crate) fn count_inferred(resource: u64) -> String {
    format!(
        "MATCH (:Resource {{resource_id: {resource}}})<-[:supplier]-
               (:Trait)<-[r:inferred_trait]-
               (:Page)
         RETURN COUNT(*)
         LIMIT 10"
    )
}

/// Delete the inferred trait relationships of a resource, returning how many there were.
pub(crate) fn erase_inferred(resource: u64) -> String {
    format!(
        "MATCH (:Resource {{resource_id: {resource}}})<-[:supplier]-
               (:Trait)<-[r:inferred_trait]-
               (:Page)
         DELETE r
         RETURN COUNT(*)
         LIMIT 10"
    )
}

/// Link each page listed in a staged chunk to its trait.
pub(crate) fn merge_chunk(chunk_url: &str) -> String {
    format!(
        "LOAD CSV WITH HEADERS FROM {url}
         AS row
         WITH row, toInteger(row.page_id) AS page_id
         MATCH (page:Page {{page_id: page_id}})
         MATCH (trait:Trait {{eol_pk: row.trait}})
         MERGE (page)-[i:inferred_trait]->(trait)
         RETURN COUNT(i)
         LIMIT 1",
        url = literal(chunk_url),
    )
}

/// Attach a directive to its trait, creating the directive node if needed.
pub(crate) fn add_directive(resource: u64, directive: &Directive, predicate: &str) -> String {
    format!(
        "MATCH (t:Trait {{resource_pk: {trait_pk}}})-[:supplier]->
               (r:Resource {{resource_id: {resource}}})
         MERGE (pred:Term {{uri: {predicate}}})
         MERGE (m:MetaData {{eol_pk: {eol_pk},
                            measurement: {page}}})
         MERGE (m)-[:predicate]->(pred)
         MERGE (t)-[:metadata]->(m)
         RETURN m.eol_pk
         LIMIT 10",
        trait_pk = literal(&directive.trait_pk),
        predicate = literal(predicate),
        eol_pk = literal(&directive.eol_pk(resource)),
        page = literal(&directive.page_id.to_string()),
    )
}

/// Whether a query could change the graph.
pub(crate) fn is_write(query: &str) -> bool {
    let upper = query.to_ascii_uppercase();
    ["MERGE", "CREATE", "DELETE", "SET ", "REMOVE", "LOAD CSV"]
        .iter()
        .any(|keyword| upper.contains(keyword))
}
