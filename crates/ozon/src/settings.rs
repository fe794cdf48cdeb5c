use {
    marketsync_channels::{Channel, Error as ChannelError},
    secrecy::Secret,
};

/// Seller API credentials of one channel.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub api_key: Secret<String>,
}

impl Credentials {
    pub fn from_channel(channel: &Channel) -> Result<Self, ChannelError> {
        let client_id = channel
            .config
            .get_str("ozonClientId")
            .ok_or_else(|| ChannelError::missing_config("Client Id is not set in the channel configuration"))?;
        let api_key = channel
            .config
            .get_str("ozonApiKey")
            .ok_or_else(|| ChannelError::missing_config("API key is not set in the channel configuration"))?;
        Ok(Self {
            client_id,
            api_key: Secret::new(api_key),
        })
    }
}

/// Channel settings the Ozon handler reads from `channel.config`.
#[derive(Debug, Clone)]
pub struct OzonSettings {
    pub credentials: Credentials,
    /// Attribute holding the Ozon product id (or a `task_id=` placeholder).
    pub id_attr: String,
    pub fbs_id_attr: Option<String>,
    pub fbo_id_attr: Option<String>,
    /// Attribute of file items holding the public image URL.
    pub image_attr: Option<String>,
    /// Relations from a product to its image items. The first one carries
    /// the main image.
    pub image_relations: Vec<i64>,
}

impl OzonSettings {
    /// Validate the channel config. Missing credentials or id attribute
    /// abort the whole run.
    pub fn from_channel(channel: &Channel) -> Result<Self, ChannelError> {
        let credentials = Credentials::from_channel(channel)?;
        let id_attr = channel.config.get_str("ozonIdAttr").ok_or_else(|| {
            ChannelError::missing_config("Attribute for storing the Ozon ID is not set")
        })?;
        Ok(Self {
            credentials,
            id_attr,
            fbs_id_attr: channel.config.get_str("ozonFBSIdAttr"),
            fbo_id_attr: channel.config.get_str("ozonFBOIdAttr"),
            image_attr: channel.config.get_str("ozonImageAttr"),
            image_relations: channel.config.get_ids("imgRelations"),
        })
    }
}
