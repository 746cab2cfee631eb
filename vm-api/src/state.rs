use vm_orchestrator::VmOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: VmOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: VmOrchestrator) -> Self {
        Self { orchestrator }
    }
}
