use super::task_graph::TaskGraph;

/// Process-lifetime instrument parameters that don't change chunk to chunk.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentGlobals {
    pub max_voices: u32,
    /// 0 means "any sample rate is accepted".
    pub sample_rate: u32,
    /// 0 means "any chunk size is accepted".
    pub chunk_size: u32,
    pub activate_fx_immediately: bool,
}

impl Default for InstrumentGlobals {
    fn default() -> Self {
        InstrumentGlobals {
            max_voices: 1,
            sample_rate: 0,
            chunk_size: 0,
            activate_fx_immediately: false,
        }
    }
}

/// Holds up to two task graphs: a voice graph executed once per active voice
/// per chunk, and an FX graph executed once per chunk after voices are
/// summed. At least one must be present.
pub struct RuntimeInstrument {
    voice_graph: Option<TaskGraph>,
    fx_graph: Option<TaskGraph>,
    globals: InstrumentGlobals,
}

#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("an instrument must have a voice graph, an FX graph, or both")]
    NoGraphs,
}

impl RuntimeInstrument {
    pub fn new(
        voice_graph: Option<TaskGraph>,
        fx_graph: Option<TaskGraph>,
        globals: InstrumentGlobals,
    ) -> Result<Self, InstrumentError> {
        if voice_graph.is_none() && fx_graph.is_none() {
            return Err(InstrumentError::NoGraphs);
        }
        Ok(RuntimeInstrument {
            voice_graph,
            fx_graph,
            globals,
        })
    }

    pub fn voice_graph(&self) -> Option<&TaskGraph> {
        self.voice_graph.as_ref()
    }

    pub fn fx_graph(&self) -> Option<&TaskGraph> {
        self.fx_graph.as_ref()
    }

    pub fn globals(&self) -> InstrumentGlobals {
        self.globals
    }
}
