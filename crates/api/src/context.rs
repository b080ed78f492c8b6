use haas_core::SubjectId;

/// Authenticated subject for a request.
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SubjectContext {
    subject_id: SubjectId,
}

impl SubjectContext {
    pub fn new(subject_id: SubjectId) -> Self {
        Self { subject_id }
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }
}
