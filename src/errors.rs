use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-mailflow-config-1 Required environment variable not set: {var_name}")]
    EnvVarRequired { var_name: String },

    #[error("error-mailflow-config-2 Invalid email address: {address}")]
    InvalidEmailAddress { address: String },

    #[error("error-mailflow-config-3 Invalid duration value: {value}")]
    InvalidDuration { value: String },

    #[error("error-mailflow-config-4 Invalid capacity value: {value}")]
    InvalidCapacity { value: String },

    #[error("error-mailflow-config-5 Invalid environment name: {value}")]
    InvalidEnvironment { value: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("error-mailflow-engine-1 Rule execution failed: {rule_id}: {details}")]
    RuleExecutionFailed { rule_id: String, details: String },

    #[error("error-mailflow-engine-2 Missing required action parameter: {parameter} for {action}")]
    MissingActionParameter { parameter: String, action: String },

    #[error("error-mailflow-engine-3 Sequence not found: {sequence_id}")]
    SequenceNotFound { sequence_id: String },

    #[error("error-mailflow-engine-4 Contact not found: {contact_id}")]
    ContactNotFound { contact_id: String },

    #[error("error-mailflow-engine-5 Storage operation failed: {0}")]
    StorageFailed(#[from] StorageError),

    #[error("error-mailflow-engine-6 Scheduling failed: {details}")]
    SchedulingFailed { details: String },
}

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("error-mailflow-mailer-1 Template not found: {template_id}")]
    TemplateNotFound { template_id: String },

    #[error("error-mailflow-mailer-2 Invalid recipient address: {address}")]
    InvalidRecipient { address: String },

    #[error("error-mailflow-mailer-3 Transport send failed: {0}")]
    TransportFailed(#[from] TransportError),

    #[error("error-mailflow-mailer-4 Template storage lookup failed: {0}")]
    StorageFailed(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("error-mailflow-transport-1 HTTP request failed: {source}")]
    HttpRequestFailed {
        #[source]
        source: reqwest::Error,
    },

    #[error("error-mailflow-transport-2 Provider rejected send: status={status}: {details}")]
    ProviderRejected { status: u16, details: String },

    #[error("error-mailflow-transport-3 Provider response missing message id")]
    MissingMessageId,

    #[error("error-mailflow-transport-4 Payload serialization failed: {source}")]
    SerializationFailed {
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("error-mailflow-queue-1 MPSC queue operation failed: {operation}: {details}")]
    MpscOperationFailed { operation: String, details: String },

    #[error("error-mailflow-queue-2 Queue capacity exceeded: {queue_type}: {capacity}")]
    CapacityExceeded { queue_type: String, capacity: usize },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("error-mailflow-validation-1 Sequence validation failed: {sequence_id}: {details}")]
    SequenceValidationFailed {
        sequence_id: String,
        details: String,
    },

    #[error("error-mailflow-validation-2 Rule validation failed: {rule_id}: {details}")]
    RuleValidationFailed { rule_id: String, details: String },

    #[error("error-mailflow-validation-3 Missing required field: {field_name} in {context}")]
    MissingRequiredField { field_name: String, context: String },

    #[error("error-mailflow-validation-4 Invalid sending window: {details}")]
    InvalidSendingWindow { details: String },

    #[error("error-mailflow-validation-5 Automation rule validation failed: {rule_id}: {details}")]
    AutomationRuleValidationFailed { rule_id: String, details: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("error-mailflow-storage-200 Database connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-mailflow-storage-201 Query execution failed: {source}")]
    QueryFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-mailflow-storage-202 Row decoding failed: {data_type}: {details}")]
    DecodeFailed { data_type: String, details: String },

    #[error("error-mailflow-storage-203 Invalid input data: {details}")]
    InvalidInput { details: String },
}
