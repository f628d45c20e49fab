use std::sync::Arc;

use crate::processor::{DropEvent, ProcessResult, Processor, SharedProcessor};
use crate::record::EventRecord;
use crate::render::{JsonRenderer, Renderer};

/// An ordered chain of processors followed by a terminal renderer.
///
/// Each stage receives the record produced by the previous one; the first
/// stage that returns [`DropEvent`] ends processing for that event. A
/// pipeline is itself a [`Processor`], so a sub-chain can be nested inside
/// another pipeline or a conditional wrapper.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<SharedProcessor>,
    renderer: Arc<dyn Renderer>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Run every stage, then render the surviving record.
    pub fn run(&self, logger: &str, method: &str, record: EventRecord) -> Result<String, DropEvent> {
        let record = self.process(logger, method, record)?;
        Ok(self.renderer.render(&record))
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Processor for Pipeline {
    fn process(&self, logger: &str, method: &str, record: EventRecord) -> ProcessResult {
        self.stages
            .iter()
            .try_fold(record, |record, stage| stage.process(logger, method, record))
    }
}

/// Builder for [`Pipeline`]. The renderer defaults to [`JsonRenderer`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<SharedProcessor>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl PipelineBuilder {
    /// Append a stage.
    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.stages.push(Arc::new(processor));
        self
    }

    /// Append an already shared stage.
    pub fn shared(mut self, processor: SharedProcessor) -> Self {
        self.stages.push(processor);
        self
    }

    pub fn processors(mut self, processors: impl IntoIterator<Item = SharedProcessor>) -> Self {
        self.stages.extend(processors);
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn shared_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
            renderer: self.renderer.unwrap_or_else(|| Arc::new(JsonRenderer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn tag(name: &'static str) -> impl Processor {
        move |_logger: &str, _method: &str, mut record: EventRecord| -> ProcessResult {
            let order = match record.get_str("order") {
                Some(prev) => format!("{},{}", prev, name),
                None => name.to_string(),
            };
            record.insert("order", order);
            Ok(record)
        }
    }

    #[test]
    fn test_stages_run_in_order() {
        let pipeline = Pipeline::builder()
            .processor(tag("a"))
            .processor(tag("b"))
            .processor(tag("c"))
            .build();
        let out = pipeline.process("t", "info", EventRecord::with_event("x")).unwrap();
        assert_eq!(out.get_str("order"), Some("a,b,c"));
    }

    #[test]
    fn test_drop_short_circuits() {
        let reached = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&reached);
        let pipeline = Pipeline::builder()
            .processor(|_: &str, _: &str, _: EventRecord| -> ProcessResult { Err(DropEvent) })
            .processor(move |_: &str, _: &str, record: EventRecord| -> ProcessResult {
                *flag.lock() = true;
                Ok(record)
            })
            .build();
        assert_eq!(pipeline.run("t", "info", EventRecord::with_event("x")), Err(DropEvent));
        assert!(!*reached.lock());
    }

    #[test]
    fn test_run_renders_json_by_default() {
        let pipeline = Pipeline::builder().processor(tag("a")).build();
        let line = pipeline.run("t", "info", EventRecord::with_event("hi")).unwrap();
        assert_eq!(line, r#"{"event":"hi","order":"a"}"#);
    }

    #[test]
    fn test_nested_pipeline() {
        let inner = Pipeline::builder().processor(tag("inner")).build();
        let outer = Pipeline::builder()
            .processor(tag("outer"))
            .processor(inner)
            .build();
        let out = outer.process("t", "info", EventRecord::new()).unwrap();
        assert_eq!(out.get_str("order"), Some("outer,inner"));
        assert_eq!(outer.len(), 2);
    }
}
