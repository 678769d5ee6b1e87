use async_trait::async_trait;
use neo4rs::{BoltList, BoltMap, BoltString, BoltType, Graph, Query};
use tracing::{debug, info};

use crate::{GraphRow, GraphStats, GraphStore, IndexError};

const SCHEMA: &[(&str, &str)] = &[
    (
        "Failed to create uniqueness constraint on Entity.canon",
        concat!(
            "CREATE CONSTRAINT unique_entity_canon IF NOT EXISTS ",
            "FOR (e:Entity) REQUIRE e.canon IS UNIQUE",
        ),
    ),
    (
        "Failed to create full-text index on Entity names",
        concat!(
            "CREATE FULLTEXT INDEX idx_entity_names IF NOT EXISTS ",
            "FOR (e:Entity) ON EACH [e.name, e.aliases]",
        ),
    ),
    (
        "Failed to create index on Entity.types",
        "CREATE INDEX idx_entity_types IF NOT EXISTS FOR (e:Entity) ON (e.types)",
    ),
    (
        "Failed to create index on Chunk.id",
        "CREATE INDEX idx_chunk_id IF NOT EXISTS FOR (c:Chunk) ON (c.id)",
    ),
];

/// Entities first, so that triples in any row of the batch can see them.
const UPSERT_ENTITIES: &str = r#"
UNWIND $rows AS row
MERGE (c:Chunk {id: row.chunk_id})
WITH row, c
UNWIND row.entities AS e
MERGE (ent:Entity {canon: e.canon})
  ON CREATE SET ent.name = e.name, ent.types = e.types, ent.aliases = e.aliases
MERGE (c)-[:MENTIONS]->(ent)
"#;

const UPSERT_RELATIONS: &str = r#"
UNWIND $rows AS row
UNWIND row.triples AS t
MATCH (s:Entity {canon: t.subj_canon})
MATCH (o:Entity {canon: t.obj_canon})
MERGE (s)-[r:REL {predicate: t.predicate}]->(o)
SET r.support_count = coalesce(r.support_count, 0) + 1,
    r.source_chunks = CASE
      WHEN r.source_chunks IS NULL THEN [row.chunk_id]
      WHEN row.chunk_id IN r.source_chunks THEN r.source_chunks
      ELSE r.source_chunks + row.chunk_id
    END
"#;

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, IndexError> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|source| IndexError::Neo4j {
                context: "Failed to connect to Neo4j",
                source,
            })?;
        Ok(Self::new(graph))
    }

    async fn count(&self, cypher: &str) -> Result<usize, IndexError> {
        let neo4j = |source| IndexError::Neo4j {
            context: "Failed to read graph statistics",
            source,
        };

        let mut result = self.graph.execute(Query::new(cypher.to_string())).await.map_err(neo4j)?;
        let count = match result.next().await.map_err(neo4j)? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };
        Ok(count)
    }
}

fn string_list(values: &[String]) -> BoltType {
    let mut list = BoltList::new();
    for value in values {
        list.push(BoltType::from(value.as_str()));
    }
    BoltType::List(list)
}

fn bolt_map(entries: Vec<(&str, BoltType)>) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in entries {
        map.put(BoltString::from(key), value);
    }
    BoltType::Map(map)
}

/// The `$rows` parameter shape consumed by the upsert statements.
fn rows_param(rows: &[GraphRow]) -> BoltType {
    let mut list = BoltList::new();

    for row in rows {
        let mut entities = BoltList::new();
        for e in &row.entities {
            entities.push(bolt_map(vec![
                ("name", BoltType::from(e.name.as_str())),
                ("canon", BoltType::from(e.canonical_name.as_str())),
                ("types", string_list(&e.types)),
                ("aliases", string_list(&e.aliases)),
            ]));
        }

        let mut triples = BoltList::new();
        for t in &row.triples {
            triples.push(bolt_map(vec![
                ("subj_canon", BoltType::from(t.subject_canonical.as_str())),
                ("predicate", BoltType::from(t.predicate.as_str())),
                ("obj_canon", BoltType::from(t.object_canonical.as_str())),
            ]));
        }

        list.push(bolt_map(vec![
            ("chunk_id", BoltType::from(row.chunk_id.as_str())),
            ("entities", BoltType::List(entities)),
            ("triples", BoltType::List(triples)),
        ]));
    }

    BoltType::List(list)
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_schema(&self) -> Result<(), IndexError> {
        for &(context, cypher) in SCHEMA {
            self.graph
                .run(Query::new(cypher.to_string()))
                .await
                .map_err(|source| IndexError::Neo4j { context, source })?;
        }

        info!("Neo4j constraints and indexes ready");
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[GraphRow]) -> Result<(), IndexError> {
        if rows.is_empty() {
            return Ok(());
        }
        let neo4j = |source| IndexError::Neo4j {
            context: "Failed to upsert batch",
            source,
        };

        let rows_value = rows_param(rows);
        let queries = vec![
            Query::new(UPSERT_ENTITIES.to_string()).param("rows", rows_value.clone()),
            Query::new(UPSERT_RELATIONS.to_string()).param("rows", rows_value),
        ];

        // Both statements commit together or not at all
        let mut txn = self.graph.start_txn().await.map_err(neo4j)?;
        txn.run_queries(queries).await.map_err(neo4j)?;
        txn.commit().await.map_err(neo4j)?;

        debug!(rows = rows.len(), "Batch committed");
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, IndexError> {
        Ok(GraphStats {
            entity_count: self.count("MATCH (e:Entity) RETURN count(e) as count").await?,
            relation_count: self.count("MATCH ()-[r:REL]->() RETURN count(r) as count").await?,
        })
    }
}
