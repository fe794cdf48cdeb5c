use std::error::Error as StdError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures while talking to Ozon or mapping an item.
///
/// Everything except [`Error::Channels`] and [`Error::External`] is an
/// expected, item-level outcome that is recorded on the item.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Non-success HTTP status from the Ozon API.
    #[error("Ozon request error: {status} {body}")]
    Api { status: String, body: String },

    #[error("This item does not match any category of the channel")]
    NoCategory,

    #[error("No configuration or data for \"{field}\" for category: {category}")]
    MissingField {
        field: &'static str,
        category: String,
    },

    #[error("No value for required attribute \"{attribute}\" for category: {category}")]
    MissingRequired { attribute: String, category: String },

    #[error("Value \"{value}\" not found in dictionary for attribute \"{attribute}\" for category: {category}")]
    DictionaryValueNotFound {
        value: String,
        attribute: String,
        category: String,
    },

    #[error("No data for attribute dictionary: {attribute_id}, for category: {category_id}")]
    DictionaryEmpty { attribute_id: i64, category_id: i64 },

    #[error("Data dictionary for attribute: {attribute_id} is too big, for category: {category_id}")]
    DictionaryOversized { attribute_id: i64, category_id: i64 },

    #[error("Error evaluating attribute \"{attribute}\" for category: {category}: {message}")]
    AttributeEvaluation {
        attribute: String,
        category: String,
        message: String,
    },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Channels(#[from] marketsync_channels::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Text stored as the item's channel message.
    pub fn item_message(&self) -> String {
        match self {
            Self::Channels(_) | Self::External { .. } => format!("Item processing error: {self}"),
            _ => self.to_string(),
        }
    }
}

impl From<Error> for marketsync_channels::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Channels(inner) => inner,
            other => Self::external("ozon", other),
        }
    }
}

impl marketsync_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

marketsync_common::impl_context!();
