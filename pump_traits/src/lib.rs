pub mod clock;
pub mod pod;

pub use clock::{Clock, ManualClock, SystemClock};
pub use pod::{
    BasalSegment, CommError, ConnectionState, DeliveryStatus, PodStatus, ProgramType,
    StopProgramType,
};

/// Result of one pod exchange.
pub type CommResult<T> = Result<T, CommError>;

/// Continuation invoked exactly once with the outcome of a pod exchange, on
/// whatever thread the communication stack delivers responses.
pub type Completion<T> = Box<dyn FnOnce(CommResult<T>) + Send + 'static>;

/// Request/response control surface of the pod communication stack.
///
/// Every call returns immediately; the outcome arrives later through the
/// completion. Implementations must invoke each completion at most once.
pub trait PodComm: Send + Sync {
    fn send_program(&self, program: ProgramType, completion: Completion<PodStatus>);
    fn stop_program(&self, program: StopProgramType, completion: Completion<PodStatus>);
    fn get_status(&self, completion: Completion<PodStatus>);
}

impl<T: PodComm + ?Sized> PodComm for std::sync::Arc<T> {
    fn send_program(&self, program: ProgramType, completion: Completion<PodStatus>) {
        (**self).send_program(program, completion);
    }
    fn stop_program(&self, program: StopProgramType, completion: Completion<PodStatus>) {
        (**self).stop_program(program, completion);
    }
    fn get_status(&self, completion: Completion<PodStatus>) {
        (**self).get_status(completion);
    }
}
