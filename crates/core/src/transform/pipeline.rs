use log::{debug, info};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::definition::{OutputDeclaration, TransformerDefinition};
use super::factory::TransformerFactory;
use super::join::JoinBuffer;
use super::traits::{TransformContext, Transformer};
use crate::errors::{ConfigError, TransformationError};
use crate::records::Record;
use crate::sinks::SeriesRoute;

struct Stage {
    id: String,
    transformer: Box<dyn Transformer>,
    output: OutputDeclaration,
    buffer: JoinBuffer,
}

/// Result of feeding one record through the pipeline.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Derived records in emission order, including records derived from
    /// other derived records.
    pub derived: Vec<Arc<Record>>,
    /// `(transformer id, error)` for each dropped input set.
    pub errors: Vec<(String, TransformationError)>,
}

/// The wired transformer DAG.
///
/// Owned by the router task; processing is single-threaded.
#[derive(Default)]
pub struct TransformerPipeline {
    /// Topological order.
    stages: Vec<Stage>,
    /// series id -> indexes of consuming stages, ascending.
    consumers: HashMap<String, Vec<usize>>,
}

impl TransformerPipeline {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds and validates the DAG.
    ///
    /// `source_series` are the registry series ids. Fails when a transformer
    /// id or output id repeats, an output collides with a registry series, an
    /// input is unknown or repeated, a kind is unknown, or the graph has a cycle.
    pub fn build(
        definitions: &[TransformerDefinition],
        factory: &TransformerFactory,
        source_series: &HashSet<String>,
        join_buffer_depth: usize,
    ) -> Result<Self, ConfigError> {
        let mut ids = HashSet::new();
        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (index, def) in definitions.iter().enumerate() {
            if !ids.insert(def.id.as_str()) {
                return Err(invalid(def, "transformer id is declared more than once"));
            }
            let output = def.output.series_id.as_str();
            if source_series.contains(output) || producers.insert(output, index).is_some() {
                return Err(ConfigError::SeriesIdCollision(output.to_string()));
            }
            if def.output.destinations.is_empty() {
                return Err(invalid(def, "output has no destinations"));
            }
        }

        for def in definitions {
            if def.inputs.is_empty() {
                return Err(invalid(def, "no inputs declared"));
            }
            let mut seen = HashSet::new();
            for input in &def.inputs {
                if !seen.insert(input.as_str()) {
                    return Err(invalid(def, &format!("input '{input}' is repeated")));
                }
                if !source_series.contains(input) && !producers.contains_key(input.as_str()) {
                    return Err(invalid(def, &format!("input '{input}' is not a known series")));
                }
            }
        }

        // stage -> stages consuming its output
        let edges: Vec<Vec<usize>> = definitions
            .iter()
            .map(|def| {
                definitions
                    .iter()
                    .enumerate()
                    .filter(|(_, other)| other.inputs.contains(&def.output.series_id))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();

        let order = topological_order(&edges).map_err(|cycle| {
            ConfigError::CyclicTransformers(
                cycle.into_iter().map(|i| definitions[i].id.clone()).collect(),
            )
        })?;

        let mut stages = Vec::with_capacity(definitions.len());
        let mut consumers: HashMap<String, Vec<usize>> = HashMap::new();
        for def_index in order {
            let def = &definitions[def_index];
            let transformer = factory.build(def)?;
            if transformer.required_inputs() != def.inputs.as_slice() {
                return Err(invalid(def, "built transformer disagrees with declared inputs"));
            }
            if transformer.join_policy() != def.join {
                return Err(invalid(def, "built transformer disagrees with declared join policy"));
            }

            let stage_index = stages.len();
            for input in &def.inputs {
                consumers.entry(input.clone()).or_default().push(stage_index);
            }
            debug!(
                "Transformer '{}' ({}) consumes {:?} -> {}",
                def.id, def.kind, def.inputs, def.output.series_id
            );
            stages.push(Stage {
                id: def.id.clone(),
                buffer: JoinBuffer::new(def.inputs.clone(), def.join, join_buffer_depth),
                transformer,
                output: def.output.clone(),
            });
        }

        if !stages.is_empty() {
            info!("Transformer pipeline wired with {} stages", stages.len());
        }
        Ok(Self { stages, consumers })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Stage ids in execution order.
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn consumes(&self, series_id: &str) -> bool {
        self.consumers.contains_key(series_id)
    }

    /// Routes for every derived series.
    pub fn output_routes(&self) -> Vec<SeriesRoute> {
        self.stages.iter().map(|s| s.output.route()).collect()
    }

    /// Feeds `record` to every stage consuming its series, then feeds each
    /// derived record onward until nothing else fires.
    pub fn process(&mut self, record: &Arc<Record>) -> PipelineOutput {
        let mut output = PipelineOutput::default();
        let mut queue = VecDeque::from([Arc::clone(record)]);

        while let Some(current) = queue.pop_front() {
            let Some(indexes) = self.consumers.get(current.series_id()).cloned() else {
                continue;
            };
            for index in indexes {
                let stage = &mut self.stages[index];
                let Some(inputs) = stage.buffer.offer(&current) else {
                    continue;
                };
                match run_stage(stage, &inputs) {
                    Ok(records) => {
                        for derived in records {
                            let derived = Arc::new(derived);
                            output.derived.push(Arc::clone(&derived));
                            queue.push_back(derived);
                        }
                    }
                    Err(err) => output.errors.push((stage.id.clone(), err)),
                }
            }
        }

        output
    }
}

fn run_stage(stage: &Stage, inputs: &[Arc<Record>]) -> Result<Vec<Record>, TransformationError> {
    let ctx = TransformContext {
        transformer_id: &stage.id,
        output: &stage.output,
    };
    let records = stage.transformer.transform(&ctx, inputs)?;
    // the whole set is dropped if any record is mislabeled
    for record in &records {
        if record.series_id() != stage.output.series_id {
            return Err(TransformationError::OutputMismatch {
                expected: stage.output.series_id.clone(),
                actual: record.series_id().to_string(),
            });
        }
        if record.schema_name() != stage.output.schema {
            return Err(TransformationError::OutputMismatch {
                expected: format!("{} ({})", stage.output.series_id, stage.output.schema),
                actual: format!("{} ({})", record.series_id(), record.schema_name()),
            });
        }
    }
    Ok(records)
}

/// Kahn's algorithm with a stable tie-break on declaration order.
/// On failure returns one cycle as a closed path of node indexes.
fn topological_order(edges: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = edges.len();
    let mut indegree = vec![0usize; n];
    for targets in edges {
        for &t in targets {
            indegree[t] += 1;
        }
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &t in &edges[node] {
            indegree[t] -= 1;
            if indegree[t] == 0 {
                ready.push_back(t);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err(find_cycle(edges, &indegree))
    }
}

fn find_cycle(edges: &[Vec<usize>], indegree: &[usize]) -> Vec<usize> {
    // every node left with indegree > 0 lies on or downstream of a cycle;
    // walking predecessors that are still blocked must revisit a node
    let blocked: Vec<bool> = indegree.iter().map(|&d| d > 0).collect();
    let Some(start) = blocked.iter().position(|&b| b) else {
        return Vec::new();
    };

    let predecessor = |node: usize| {
        (0..edges.len()).find(|&p| blocked[p] && edges[p].contains(&node))
    };

    let mut path = vec![start];
    let mut current = start;
    while let Some(prev) = predecessor(current) {
        if let Some(pos) = path.iter().position(|&n| n == prev) {
            let mut cycle: Vec<usize> = path[pos..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        path.push(prev);
        current = prev;
    }
    path
}

fn invalid(def: &TransformerDefinition, message: &str) -> ConfigError {
    ConfigError::InvalidTransformer {
        transformer: def.id.clone(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::JoinPolicy;
    use chrono::{TimeZone, Utc};

    fn decl(id: &str, kind: &str, inputs: &[&str], output: &str) -> TransformerDefinition {
        TransformerDefinition {
            id: id.into(),
            kind: kind.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            join: JoinPolicy::Latest,
            output: OutputDeclaration {
                series_id: output.into(),
                schema: "spread".into(),
                data_source: "derived".into(),
                asset_type: "spread".into(),
                symbol: None,
                destinations: vec!["cache".into()],
            },
            params: serde_json::json!({}),
        }
    }

    fn sources(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn trade(series: &str, secs: i64, price: f64) -> Arc<Record> {
        Arc::new(
            Record::new(series, series, "trades", Utc.timestamp_opt(secs, 0).unwrap())
                .with_field("price", price)
                .with_field("size", 1.0),
        )
    }

    #[test]
    fn test_latest_join_fires_only_after_both_inputs() {
        let defs = vec![decl("xy", "spread", &["X", "Y"], "XY")];
        let mut pipeline = TransformerPipeline::build(
            &defs,
            &TransformerFactory::with_builtins(),
            &sources(&["X", "Y"]),
            16,
        )
        .unwrap();

        assert!(pipeline.process(&trade("X", 1, 10.0)).derived.is_empty());
        assert!(pipeline.process(&trade("X", 2, 11.0)).derived.is_empty());

        let out = pipeline.process(&trade("Y", 3, 4.0));
        assert_eq!(out.derived.len(), 1);
        assert_eq!(out.derived[0].f64_field("value"), Some(7.0));

        // every later update of either input fires again
        assert_eq!(pipeline.process(&trade("Y", 4, 5.0)).derived.len(), 1);
        let out = pipeline.process(&trade("X", 5, 20.0));
        assert_eq!(out.derived[0].f64_field("value"), Some(15.0));
    }

    #[test]
    fn test_chained_stages_run_in_order() {
        // declared downstream-first; build must still order them
        let defs = vec![
            decl("outer", "spread", &["XY", "Z"], "XYZ"),
            decl("inner", "spread", &["X", "Y"], "XY"),
        ];
        let mut pipeline = TransformerPipeline::build(
            &defs,
            &TransformerFactory::with_builtins(),
            &sources(&["X", "Y", "Z"]),
            16,
        )
        .unwrap();
        assert_eq!(pipeline.stage_ids(), vec!["inner", "outer"]);

        // "value" is the spread schema's field, so feed a Z record carrying it
        let z = Arc::new(
            Record::new("Z", "Z", "spread", Utc.timestamp_opt(1, 0).unwrap())
                .with_field("value", 1.0),
        );
        pipeline.process(&z);
        pipeline.process(&trade("X", 2, 10.0));
        let out = pipeline.process(&trade("Y", 3, 4.0));

        // inner fires (XY = 6); outer needs XY.price, which a spread record lacks
        assert_eq!(out.derived.len(), 1);
        assert_eq!(out.derived[0].series_id(), "XY");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].0, "outer");
    }

    #[test]
    fn test_cycle_is_rejected() {
        let defs = vec![
            decl("a", "spread", &["X", "B_OUT"], "A_OUT"),
            decl("b", "spread", &["A_OUT", "Y"], "B_OUT"),
        ];
        let err = TransformerPipeline::build(
            &defs,
            &TransformerFactory::with_builtins(),
            &sources(&["X", "Y"]),
            16,
        )
        .err()
        .unwrap();
        match err {
            ConfigError::CyclicTransformers(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"a".to_string()) && path.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let defs = vec![decl("a", "mid", &["A_OUT"], "A_OUT")];
        let err = TransformerPipeline::build(
            &defs,
            &TransformerFactory::with_builtins(),
            &sources(&[]),
            16,
        )
        .err()
        .unwrap();
        assert_eq!(err, ConfigError::CyclicTransformers(vec!["a".into(), "a".into()]));
    }

    #[test]
    fn test_unknown_input_and_collisions() {
        let factory = TransformerFactory::with_builtins();
        let defs = vec![decl("a", "spread", &["X", "NOPE"], "OUT")];
        assert!(matches!(
            TransformerPipeline::build(&defs, &factory, &sources(&["X"]), 16).err(),
            Some(ConfigError::InvalidTransformer { .. })
        ));

        let defs = vec![decl("a", "spread", &["X", "Y"], "X")];
        assert_eq!(
            TransformerPipeline::build(&defs, &factory, &sources(&["X", "Y"]), 16).err(),
            Some(ConfigError::SeriesIdCollision("X".into()))
        );

        let defs = vec![decl("a", "spread", &["X", "X"], "OUT")];
        assert!(TransformerPipeline::build(&defs, &factory, &sources(&["X"]), 16).is_err());

        let defs = vec![decl("a", "ewma", &["X"], "OUT")];
        assert!(TransformerPipeline::build(&defs, &factory, &sources(&["X"]), 16).is_err());
    }

    #[test]
    fn test_mislabeled_output_is_dropped() {
        struct Liar {
            inputs: Vec<String>,
        }
        impl Transformer for Liar {
            fn required_inputs(&self) -> &[String] {
                &self.inputs
            }
            fn join_policy(&self) -> JoinPolicy {
                JoinPolicy::Latest
            }
            fn transform(
                &self,
                _ctx: &TransformContext<'_>,
                inputs: &[Arc<Record>],
            ) -> Result<Vec<Record>, TransformationError> {
                Ok(vec![Record::new("SOMETHING_ELSE", "S", "spread", inputs[0].timestamp())])
            }
        }

        let mut factory = TransformerFactory::new();
        factory.register("liar", |def| {
            Ok(Box::new(Liar {
                inputs: def.inputs.clone(),
            }) as Box<dyn Transformer>)
        });
        let defs = vec![decl("l", "liar", &["X"], "OUT")];
        let mut pipeline = TransformerPipeline::build(&defs, &factory, &sources(&["X"]), 4).unwrap();

        let out = pipeline.process(&trade("X", 1, 1.0));
        assert!(out.derived.is_empty());
        assert!(matches!(
            out.errors[0].1,
            TransformationError::OutputMismatch { .. }
        ));
    }
}
