//! Ozon channel handler: submission runs, sync runs and schema lookups.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    marketsync_channels::{
        BasicExpressionEvaluator, CategoryMapping, CategoryNode, Channel, ChannelAttribute,
        ChannelHandler, ChannelType, ExecutionLog, ExpressionEvaluator, Item, ItemChannelStatus,
        ItemPatch, ItemStore, ItemWriter, MappingOption, RunRequest, StatusPatch,
        mapping::{read_attribute, resolve_category, value_by_mapping},
    },
    marketsync_common::{time::now_ms, value},
    marketsync_config::{MarketsyncConfig, OzonConfig},
    serde_json::{Value, json},
    tracing::{debug, error, info, warn},
};

use crate::{
    Context, Error, Result,
    api::{ProductInfo, RemoteCategory},
    cache::{Dictionary, SchemaCache, attributes_key, categories_key, dictionary_key},
    client::OzonClient,
    payload::{
        self, AttributeValues, IMAGES_360, MANDATORY_FIELDS, OLD_PRICE, PREMIUM_PRICE,
        ProductFields, ProductPayload, VIDEO_NAMES, VIDEO_URLS,
    },
    settings::{Credentials, OzonSettings},
};

const TASK_PREFIX: &str = "task_id=";
const PICKER_PAGE_SIZE: u32 = 1000;

/// Per-run state shared by every item of one execution.
struct Run<'a> {
    channel: &'a Channel,
    language: &'a str,
    settings: OzonSettings,
    writer: ItemWriter,
}

impl Run<'_> {
    fn creds(&self) -> &Credentials {
        &self.settings.credentials
    }
}

/// Outcome of building and submitting one item.
struct Submitted {
    patch: ItemPatch,
}

/// [`ChannelHandler`] for the Ozon Seller API.
pub struct OzonHandler {
    client: OzonClient,
    store: Arc<dyn ItemStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    cache: SchemaCache,
    config: OzonConfig,
    dependent_channels: Vec<String>,
}

impl OzonHandler {
    pub fn new(config: &MarketsyncConfig, store: Arc<dyn ItemStore>) -> Result<Self> {
        let client = OzonClient::new(
            config.ozon.base_url.clone(),
            Duration::from_secs(config.http.timeout_secs),
            &config.http.user_agent,
        )?;
        Ok(Self::with_client(
            client,
            store,
            &config.ozon,
            config.sync.dependent_channels.clone(),
        ))
    }

    pub fn with_client(
        client: OzonClient,
        store: Arc<dyn ItemStore>,
        config: &OzonConfig,
        dependent_channels: Vec<String>,
    ) -> Self {
        Self {
            client,
            store,
            evaluator: Arc::new(BasicExpressionEvaluator),
            cache: SchemaCache::new(Duration::from_secs(config.cache_ttl_secs)),
            config: config.clone(),
            dependent_channels,
        }
    }

    /// Replace the built-in expression evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    // ── Full runs ───────────────────────────────────────────────────────

    async fn export(&self, run: &Run<'_>, log: &mut ExecutionLog) -> Result<()> {
        let items = self
            .store
            .find_by_channel_status(
                &run.channel.tenant_id,
                &run.channel.identifier,
                ItemChannelStatus::Submitted,
            )
            .await?;
        log.line("Ozon export started");
        log.line(format!("Found {} items to process", items.len()));
        log.line("");

        for item in &items {
            log.line(format!("Processing item: {}", item.identifier));
            if let Err(e) = self.process_item(run, item, log).await {
                error!(
                    tenant = %item.tenant_id,
                    item = item.id,
                    error = %e,
                    "failed to process item"
                );
                let message = e.item_message();
                log.line(&message);
                let patch = ItemPatch::status(StatusPatch::new(ItemChannelStatus::Error, message));
                if let Err(e) = run.writer.apply(item.id, &patch).await {
                    error!(item = item.id, error = %e, "failed to record item error");
                }
            }
            log.line("");
        }
        Ok(())
    }

    async fn process_item(&self, run: &Run<'_>, item: &Item, log: &mut ExecutionLog) -> Result<()> {
        let resolved = resolve_category(
            self.evaluator.as_ref(),
            self.store.as_ref(),
            run.channel,
            item,
        )
        .await?;
        let Some((category_id, mapping)) = resolved else {
            log.line(format!(
                "Item {} does not match any category of this channel",
                item.identifier
            ));
            return Err(Error::NoCategory);
        };
        log.line(format!(
            "Found category \"{}\" for item {}",
            mapping.name, item.identifier
        ));

        let patch = match self.submit_item(run, item, category_id, mapping, log).await {
            Ok(done) => done.patch,
            Err(e) => {
                let message = e.item_message();
                log.line(&message);
                warn!(item = item.id, error = %e, "item not submitted");
                ItemPatch::status(
                    StatusPatch::new(ItemChannelStatus::Error, message).category(category_id),
                )
            },
        };
        run.writer.apply(item.id, &patch).await?;
        Ok(())
    }

    async fn submit_item(
        &self,
        run: &Run<'_>,
        item: &Item,
        category_id: &str,
        mapping: &CategoryMapping,
        log: &mut ExecutionLog,
    ) -> Result<Submitted> {
        let mut product = self.build_product(run, item, category_id, mapping).await?;
        let mut patch = ItemPatch::default();

        let existing = item
            .values
            .get(&run.settings.id_attr)
            .filter(|v| value::is_truthy(v))
            .and_then(|v| value::as_text(v).parse::<i64>().ok());
        if let Some(product_id) = existing {
            self.reconcile_existing(run, item, mapping, product_id, &mut product, &mut patch, log)
                .await?;
        }

        if log.is_debug()
            && let Ok(body) = serde_json::to_string(&product)
        {
            log.debug(format!("Sending product to Ozon: {body}"));
        }
        let task_id = self
            .client
            .import_products(run.creds(), std::slice::from_ref(&product))
            .await?
            .result
            .task_id;
        info!(item = item.id, task_id, "product submitted to Ozon");
        log.debug(format!("Import task created: {task_id}"));

        tokio::time::sleep(Duration::from_millis(self.config.task_poll_delay_ms)).await;

        let info = self.client.import_info(run.creds(), task_id).await?;
        let imported = info.result.items.first();
        log.debug(format!("Import task {task_id} status: {:?}", imported.map(|i| &i.status)));

        let product_value = |product_id: i64| {
            if product_id == 0 {
                Value::from(format!("{TASK_PREFIX}{task_id}"))
            } else {
                Value::from(product_id)
            }
        };
        let status = match imported {
            Some(result) if result.status == "imported" => {
                log.line(format!("Item {} submitted successfully", item.identifier));
                patch.set_value(&run.settings.id_attr, product_value(result.product_id));
                let message = if result.errors.is_empty() {
                    "Product is under moderation".to_string()
                } else {
                    format!(
                        "Product is under moderation: {}",
                        Value::Array(result.errors.clone())
                    )
                };
                StatusPatch::new(ItemChannelStatus::PendingModeration, message).synced_at(now_ms())
            },
            Some(result) if result.status == "failed" => {
                log.line(format!("Item {} was rejected by Ozon", item.identifier));
                let message = if result.errors.is_empty() {
                    String::new()
                } else {
                    format!("Errors: {}", Value::Array(result.errors.clone()))
                };
                StatusPatch::new(ItemChannelStatus::Error, message)
            },
            other => {
                let status = other.map_or("unknown", |r| r.status.as_str());
                log.line(format!(
                    "Item {} submitted with status: {status}",
                    item.identifier
                ));
                patch.set_value(
                    &run.settings.id_attr,
                    product_value(other.map_or(0, |r| r.product_id)),
                );
                StatusPatch::new(ItemChannelStatus::PendingModeration, "")
            },
        };
        patch.set_status(status.category(category_id));
        Ok(Submitted { patch })
    }

    async fn build_product(
        &self,
        run: &Run<'_>,
        item: &Item,
        category_id: &str,
        mapping: &CategoryMapping,
    ) -> Result<ProductPayload> {
        let ozon_category = payload::category_number(category_id)
            .with_context(|| format!("Invalid Ozon category id: {category_id}"))?;

        let mut mandatory = Vec::with_capacity(MANDATORY_FIELDS.len());
        for (field, label) in MANDATORY_FIELDS {
            let value = self
                .mapped(run, item, mapping, field)
                .await?
                .ok_or_else(|| Error::MissingField {
                    field: label,
                    category: mapping.name.clone(),
                })?;
            mandatory.push(value);
        }
        let [offer_id, vat, barcode, price, depth, width, height, weight, name] =
            <[Value; 9]>::try_from(mandatory)
                .ok()
                .context("mandatory field count mismatch")?;
        let mut product = ProductPayload::new(ozon_category, ProductFields {
            offer_id,
            vat,
            barcode,
            price,
            depth,
            width,
            height,
            weight,
            name,
        });

        product.old_price = self.mapped(run, item, mapping, OLD_PRICE).await?;
        product.premium_price = self.mapped(run, item, mapping, PREMIUM_PRICE).await?;
        let urls = self.mapped(run, item, mapping, VIDEO_URLS).await?;
        let names = self.mapped(run, item, mapping, VIDEO_NAMES).await?;
        product.set_videos(urls, names);

        for attr_mapping in &mapping.attributes {
            if payload::is_product_field(&attr_mapping.id) {
                continue;
            }
            let schema = self.attribute_schema(run.creds(), category_id).await?;
            let Some(attr) = schema.iter().find(|a| a.id == attr_mapping.id) else {
                warn!(attribute = %attr_mapping.id, category = category_id, "attribute not found in channel schema");
                continue;
            };
            let Some(attr_id) = payload::attribute_number(&attr.id) else {
                warn!(attribute = %attr.id, "attribute id is not numeric");
                continue;
            };

            let mapped = value_by_mapping(
                self.evaluator.as_ref(),
                run.channel,
                item,
                Some(attr_mapping),
                run.language,
            )
            .await
            .map_err(|e| Error::AttributeEvaluation {
                attribute: attr.name.clone(),
                category: mapping.name.clone(),
                message: e.to_string(),
            })?
            .filter(value::is_truthy);

            let Some(mapped) = mapped.map(payload::trimmed) else {
                if attr.required {
                    return Err(Error::MissingRequired {
                        attribute: attr.name.clone(),
                        category: mapping.name.clone(),
                    });
                }
                continue;
            };

            let mut values = AttributeValues {
                complex_id: 0,
                id: attr_id,
                values: Vec::new(),
            };
            match mapped {
                Value::Object(_) => values.values.push(mapped),
                other => {
                    for elem in payload::as_list(other).into_iter().map(payload::trimmed) {
                        let resolved = self
                            .attribute_value(
                                run.creds(),
                                ozon_category,
                                attr_id,
                                attr.dictionary,
                                &elem,
                                &attr_mapping.options,
                            )
                            .await?
                            .ok_or_else(|| Error::DictionaryValueNotFound {
                                value: value::as_text(&elem),
                                attribute: attr.name.clone(),
                                category: mapping.name.clone(),
                            })?;
                        values.values.push(resolved);
                    }
                },
            }
            product.attributes.push(values);
        }

        self.attach_images(run, item, &mut product).await?;

        if let Some(images) = self.mapped(run, item, mapping, IMAGES_360).await? {
            product.images360 = payload::as_list(images);
        }
        Ok(product)
    }

    /// Truthy mapped value of a product field.
    async fn mapped(
        &self,
        run: &Run<'_>,
        item: &Item,
        mapping: &CategoryMapping,
        field: &str,
    ) -> Result<Option<Value>> {
        let value = value_by_mapping(
            self.evaluator.as_ref(),
            run.channel,
            item,
            mapping.attribute(field),
            run.language,
        )
        .await?;
        Ok(value.filter(value::is_truthy))
    }

    /// Image URLs of file items related through the configured relations.
    /// The first relation supplies the primary image.
    async fn attach_images(
        &self,
        run: &Run<'_>,
        item: &Item,
        product: &mut ProductPayload,
    ) -> Result<()> {
        let (Some(image_attr), Some((main, rest))) = (
            run.settings.image_attr.as_deref(),
            run.settings.image_relations.split_first(),
        ) else {
            return Ok(());
        };
        let url = |image: &Item| {
            read_attribute(image, image_attr, run.language)
                .map(|v| value::as_text(&v))
                .filter(|u| !u.is_empty())
        };

        let mut images = Vec::new();
        let main_images = self
            .store
            .find_relation_targets(&item.tenant_id, item.id, std::slice::from_ref(main))
            .await?;
        for image in &main_images {
            let Some(url) = url(image) else { continue };
            if product.primary_image.is_none() {
                product.primary_image = Some(url);
            } else {
                images.push(url);
            }
        }
        if !rest.is_empty() {
            let others = self
                .store
                .find_relation_targets(&item.tenant_id, item.id, rest)
                .await?;
            images.extend(others.iter().filter_map(url));
        }
        product.images = images;
        Ok(())
    }

    /// Pull live prices back from an already published product and keep its
    /// uploaded videos.
    #[allow(clippy::too_many_arguments)]
    async fn reconcile_existing(
        &self,
        run: &Run<'_>,
        item: &Item,
        mapping: &CategoryMapping,
        product_id: i64,
        product: &mut ProductPayload,
        patch: &mut ItemPatch,
        log: &mut ExecutionLog,
    ) -> Result<()> {
        log.debug(format!("Requesting current state of Ozon product {product_id}"));
        let live = self.client.product_info(run.creds(), product_id).await?.result;

        let targets = [
            ("#price", &live.price, true),
            (OLD_PRICE, &live.old_price, false),
            (PREMIUM_PRICE, &live.premium_price, false),
        ];
        for (field, live_price, always) in targets {
            let Some(attr) = mapping
                .attribute(field)
                .and_then(|m| m.attr_ident.as_deref())
                .filter(|a| !a.is_empty())
            else {
                continue;
            };
            if !always && !value::is_truthy(live_price) {
                continue;
            }
            let Some(remote) = value::as_f64(live_price) else {
                continue;
            };
            let local = item.values.get(attr).and_then(value::as_f64);
            if local == Some(remote) {
                continue;
            }
            debug!(item = item.id, attr, remote, "keeping price set on Ozon");
            patch.set_value(attr, json!(remote));
            match field {
                "#price" => product.price = live_price.clone(),
                OLD_PRICE => product.old_price = Some(live_price.clone()),
                _ => product.premium_price = Some(live_price.clone()),
            }
        }

        let existing = self.client.product_attributes(run.creds(), product_id).await?;
        match payload::uploaded_videos(&existing) {
            Some(videos) => {
                log.debug(format!(
                    "Found uploaded videos: {}",
                    Value::Array(videos.clone())
                ));
                for video in videos {
                    product.push_complex(video);
                }
            },
            None => log.debug("No uploaded videos found"),
        }
        Ok(())
    }

    // ── Dictionaries ────────────────────────────────────────────────────

    /// Attribute value in import form. `None` when a dictionary attribute has
    /// no entry for `value`.
    async fn attribute_value(
        &self,
        creds: &Credentials,
        category_id: i64,
        attribute_id: i64,
        dictionary: bool,
        value: &Value,
        options: &[MappingOption],
    ) -> Result<Option<Value>> {
        if !dictionary {
            return Ok(Some(json!({ "value": value::as_text(value) })));
        }
        if let Some(option) = options.iter().find(|o| value::loose_eq(&o.name, value)) {
            return Ok(Some(json!({
                "dictionary_value_id": option.value,
                "value": value,
            })));
        }
        let entries = self.dictionary(creds, category_id, attribute_id).await?;
        let text = value::as_text(value);
        Ok(entries.iter().find(|e| e.value == text).map(|entry| {
            json!({
                "dictionary_value_id": entry.id,
                "value": value,
            })
        }))
    }

    /// Full dictionary of an attribute, fetched page by page and cached.
    async fn dictionary(
        &self,
        creds: &Credentials,
        category_id: i64,
        attribute_id: i64,
    ) -> Result<Arc<Vec<crate::api::DictionaryValue>>> {
        let key = dictionary_key(&creds.client_id, category_id, attribute_id);
        match self.cache.dictionaries.get(&key) {
            Some(Dictionary::Values(entries)) => return Ok(entries),
            Some(Dictionary::Oversized) => {
                return Err(Error::DictionaryOversized {
                    attribute_id,
                    category_id,
                });
            },
            None => {},
        }

        let mut entries = Vec::new();
        let mut last_value_id = 0;
        let mut pages = 0;
        loop {
            let page = self
                .client
                .attribute_values(
                    creds,
                    category_id,
                    attribute_id,
                    last_value_id,
                    self.config.dictionary_page_size,
                )
                .await?;
            entries.extend(page.result);
            if entries.is_empty() {
                return Err(Error::DictionaryEmpty {
                    attribute_id,
                    category_id,
                });
            }
            if !page.has_next {
                break;
            }
            pages += 1;
            if pages >= self.config.dictionary_max_pages {
                warn!(category_id, attribute_id, pages, "attribute dictionary is too big");
                self.cache.dictionaries.insert(key, Dictionary::Oversized);
                return Err(Error::DictionaryOversized {
                    attribute_id,
                    category_id,
                });
            }
            last_value_id = entries.last().map_or(0, |e| e.id);
        }

        debug!(category_id, attribute_id, entries = entries.len(), "dictionary loaded");
        let entries = Arc::new(entries);
        self.cache
            .dictionaries
            .insert(key, Dictionary::Values(Arc::clone(&entries)));
        Ok(entries)
    }

    // ── Schema ──────────────────────────────────────────────────────────

    async fn category_tree(&self, creds: &Credentials) -> Result<Arc<CategoryNode>> {
        let key = categories_key(&creds.client_id);
        if let Some(tree) = self.cache.categories.get(&key) {
            return Ok(tree);
        }
        let response = self.client.category_tree(creds).await?;
        let tree = Arc::new(CategoryNode {
            id: String::new(),
            name: "root".into(),
            children: response.result.iter().map(category_node).collect(),
        });
        self.cache.categories.insert(key, Arc::clone(&tree));
        Ok(tree)
    }

    async fn attribute_schema(
        &self,
        creds: &Credentials,
        category_id: &str,
    ) -> Result<Arc<Vec<ChannelAttribute>>> {
        let key = attributes_key(&creds.client_id, category_id);
        if let Some(attrs) = self.cache.attributes.get(&key) {
            return Ok(attrs);
        }
        let number = payload::category_number(category_id)
            .with_context(|| format!("Invalid Ozon category id: {category_id}"))?;
        let response = self.client.category_attributes(creds, number).await?;
        let attrs: Vec<ChannelAttribute> = response
            .result
            .into_iter()
            .next()
            .map(|c| c.attributes)
            .unwrap_or_default()
            .into_iter()
            .map(|a| ChannelAttribute {
                id: format!("attr_{}", a.id),
                name: format!("{} ({})", a.name, a.kind),
                required: a.is_required,
                dictionary: a.dictionary_id != 0,
                description: Some(format!(
                    "{}\n id: {}, category: {category_id}",
                    a.description, a.id
                )),
                category: category_id.to_string(),
            })
            .collect();
        let attrs = Arc::new(attrs);
        self.cache.attributes.insert(key, Arc::clone(&attrs));
        Ok(attrs)
    }

    // ── Sync runs ───────────────────────────────────────────────────────

    async fn sync(&self, run: &Run<'_>, item: Option<i64>, log: &mut ExecutionLog) -> Result<()> {
        log.line("Ozon sync started");
        match item {
            Some(id) => {
                let item = self
                    .store
                    .get_item(id)
                    .await?
                    .ok_or_else(|| marketsync_channels::Error::not_found("item", id))?;
                self.sync_item(run, &item, true, log).await?;
            },
            None => {
                let items = self
                    .store
                    .find_with_value(&run.channel.tenant_id, &run.settings.id_attr)
                    .await?;
                log.line(format!("Found {} items to process", items.len()));
                log.line("");
                for item in &items {
                    if let Err(e) = self.sync_item(run, item, false, log).await {
                        error!(item = item.id, error = %e, "failed to sync item");
                        log.line(e.item_message());
                    }
                }
            },
        }
        log.line("Sync finished");
        Ok(())
    }

    async fn sync_item(
        &self,
        run: &Run<'_>,
        item: &Item,
        single: bool,
        log: &mut ExecutionLog,
    ) -> Result<()> {
        log.line(format!("Processing item [{}]", item.identifier));
        let id_attr = &run.settings.id_attr;
        let stored_id = item.values.get(id_attr).filter(|v| value::is_truthy(v));
        let (Some(stored_id), Some(entry)) = (stored_id, item.channels.get(&run.channel.identifier))
        else {
            log.line(format!("  item {} does not need sync", item.identifier));
            return Ok(());
        };
        if !single && entry.status == ItemChannelStatus::Error {
            log.line("  item status is error, skipping sync");
            return Ok(());
        }

        let mut patch = ItemPatch::default();
        let stored = value::as_text(stored_id);
        let product_id = match stored.strip_prefix(TASK_PREFIX) {
            Some(task) => {
                let Ok(task_id) = task.trim().parse::<i64>() else {
                    log.line(format!("  invalid import task reference: {stored}"));
                    return Ok(());
                };
                log.debug(format!("Checking import task {task_id}"));
                let info = match self.client.import_info(run.creds(), task_id).await {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(item = item.id, task_id, error = %e, "import task query failed");
                        log.line(format!("  {e}"));
                        return Ok(());
                    },
                };
                match info.result.items.first().map(|i| i.product_id) {
                    Some(product_id) if product_id != 0 => {
                        patch.set_value(id_attr, Value::from(product_id));
                        product_id
                    },
                    _ => {
                        log.line(format!(
                            "  item {} has no pending product_id yet",
                            item.identifier
                        ));
                        return Ok(());
                    },
                }
            },
            None => match stored.trim().parse::<i64>() {
                Ok(id) => id,
                Err(_) => {
                    log.line(format!("  invalid Ozon product id: {stored}"));
                    return Ok(());
                },
            },
        };

        match self.client.product_info(run.creds(), product_id).await {
            Ok(info) => self.apply_product_state(run, &info.result, &mut patch, log),
            Err(e) => {
                warn!(item = item.id, product_id, error = %e, "product info query failed");
                log.line(format!("  {e}"));
            },
        }

        run.writer.apply(item.id, &patch).await?;
        log.line(format!("  item {} synced", item.identifier));
        Ok(())
    }

    fn apply_product_state(
        &self,
        run: &Run<'_>,
        info: &ProductInfo,
        patch: &mut ItemPatch,
        log: &mut ExecutionLog,
    ) {
        let state = info.status.to_string();
        log.line(format!("  product status: {state}"));
        let now = now_ms();
        let status = if info.is_created() && !info.is_failed() && !info.is_declined() {
            let sources: Vec<String> = info
                .sources
                .iter()
                .map(|s| format!("{}={}", s.source, value::as_text(&s.sku)))
                .collect();
            log.line(format!("  sources: {}", sources.join(", ")));
            for (attr, source) in [
                (run.settings.fbs_id_attr.as_deref(), "fbs"),
                (run.settings.fbo_id_attr.as_deref(), "fbo"),
            ] {
                if let (Some(attr), Some(sku)) = (attr, info.sku(source)) {
                    patch.set_value(attr, sku.clone());
                }
            }
            StatusPatch::new(ItemChannelStatus::Synced, state)
        } else if info.is_failed() || info.is_declined() {
            StatusPatch::new(ItemChannelStatus::Error, state)
        } else {
            StatusPatch::new(ItemChannelStatus::PendingModeration, format!("Moderation: {state}"))
        };
        patch.set_status(status.synced_at(now));
    }
}

fn category_node(remote: &RemoteCategory) -> CategoryNode {
    CategoryNode {
        id: format!("cat_{}", remote.category_id),
        name: remote.title.clone(),
        children: remote.children.iter().map(category_node).collect(),
    }
}

#[async_trait]
impl ChannelHandler for OzonHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Ozon
    }

    async fn process_channel(
        &self,
        channel: &Channel,
        language: &str,
        request: RunRequest,
        log: &mut ExecutionLog,
    ) -> marketsync_channels::Result<()> {
        let settings = OzonSettings::from_channel(channel)?;
        let run = Run {
            channel,
            language,
            settings,
            writer: ItemWriter::new(
                Arc::clone(&self.store),
                channel.identifier.clone(),
                self.dependent_channels.clone(),
            ),
        };
        info!(
            tenant = %channel.tenant_id,
            channel = %channel.identifier,
            mode = %request.mode(),
            "Ozon run started"
        );
        match request {
            RunRequest::Full => self.export(&run, log).await?,
            RunRequest::Sync { item } => self.sync(&run, item, log).await?,
            RunRequest::ClearCache => {
                self.cache.clear();
                log.line("Cache cleared");
            },
        }
        Ok(())
    }

    async fn categories(&self, channel: &Channel) -> marketsync_channels::Result<Vec<CategoryNode>> {
        let creds = Credentials::from_channel(channel)?;
        let tree = self.category_tree(&creds).await?;
        Ok(vec![(*tree).clone()])
    }

    async fn attributes(
        &self,
        channel: &Channel,
        category_id: &str,
    ) -> marketsync_channels::Result<Vec<ChannelAttribute>> {
        let creds = Credentials::from_channel(channel)?;
        let attrs = self.attribute_schema(&creds, category_id).await?;
        Ok((*attrs).clone())
    }

    async fn attribute_values(
        &self,
        channel: &Channel,
        category_id: &str,
        attribute_id: &str,
    ) -> marketsync_channels::Result<Value> {
        let creds = Credentials::from_channel(channel)?;
        let attrs = self.attribute_schema(&creds, category_id).await?;
        let dictionary = attrs
            .iter()
            .find(|a| a.id == attribute_id)
            .filter(|a| a.dictionary);
        let (Some(attr), Some(category)) = (dictionary, payload::category_number(category_id))
        else {
            return Ok(json!({}));
        };
        let Some(attr_number) = payload::attribute_number(&attr.id) else {
            return Ok(json!({}));
        };
        let raw = self
            .client
            .attribute_values_raw(&creds, category, attr_number, PICKER_PAGE_SIZE)
            .await?;
        Ok(raw)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        marketsync_channels::{ItemChannelEntry, store_memory::InMemoryStore},
        mockito::{Matcher, Server},
        secrecy::Secret,
    };

    fn channel(mappings: Value) -> Channel {
        Channel {
            id: 1,
            tenant_id: "t1".into(),
            identifier: "ozon".into(),
            name: "Ozon".into(),
            channel_type: ChannelType::Ozon,
            active: true,
            config: serde_json::from_value(json!({
                "ozonClientId": "42",
                "ozonApiKey": "key",
                "ozonIdAttr": "ozonId",
                "ozonFBSIdAttr": "fbsSku",
            }))
            .unwrap(),
            mappings: serde_json::from_value(mappings).unwrap(),
        }
    }

    fn boots_mapping() -> Value {
        json!({
            "cat_17": {
                "id": "cat_17",
                "name": "Boots",
                "valid": [3],
                "visible": ["7"],
                "attributes": [
                    {"id": "#productCode", "attrIdent": "$identifier"},
                    {"id": "#vat", "value": "0.2"},
                    {"id": "#barcode", "attrIdent": "barcode"},
                    {"id": "#price", "attrIdent": "price"},
                    {"id": "#depth", "value": 300},
                    {"id": "#width", "value": 200},
                    {"id": "#height", "value": 100},
                    {"id": "#weight", "value": 900},
                    {"id": "#name", "attrIdent": "$name"},
                ]
            }
        })
    }

    fn item(identifier: &str, values: Value, status: ItemChannelStatus) -> Item {
        Item {
            id: 0,
            tenant_id: "t1".into(),
            identifier: identifier.into(),
            type_id: 3,
            path: "1.7".into(),
            name: [("ru".to_string(), format!("Boots {identifier}"))].into(),
            values: values.as_object().cloned().unwrap(),
            channels: [("ozon".to_string(), ItemChannelEntry::new(status))].into(),
        }
    }

    fn handler(server: &Server, store: Arc<InMemoryStore>, max_pages: u32) -> OzonHandler {
        let config = OzonConfig {
            base_url: server.url(),
            task_poll_delay_ms: 0,
            dictionary_max_pages: max_pages,
            ..Default::default()
        };
        let client = OzonClient::with_client(reqwest::Client::new(), server.url());
        OzonHandler::with_client(client, store, &config, vec![])
    }

    fn creds() -> Credentials {
        Credentials {
            client_id: "42".into(),
            api_key: Secret::new("key".into()),
        }
    }

    async fn run(handler: &OzonHandler, channel: &Channel, request: RunRequest) -> String {
        let mut log = ExecutionLog::new(false);
        handler
            .process_channel(channel, "ru", request, &mut log)
            .await
            .unwrap();
        log.into_string()
    }

    #[tokio::test]
    async fn missing_settings_fail_the_run() {
        let server = Server::new_async().await;
        let store = Arc::new(InMemoryStore::new());
        let h = handler(&server, store, 25);
        let mut ch = channel(json!({}));
        ch.config.extra.remove("ozonApiKey");
        let mut log = ExecutionLog::new(false);
        let err = h
            .process_channel(&ch, "ru", RunRequest::Full, &mut log)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key"), "{err}");
    }

    #[tokio::test]
    async fn batch_continues_past_item_errors() {
        let mut server = Server::new_async().await;
        let import = server
            .mock("POST", "/v2/product/import")
            .with_status(200)
            .with_body(json!({"result": {"task_id": 77}}).to_string())
            .expect(1)
            .create_async()
            .await;
        let info = server
            .mock("POST", "/v1/product/import/info")
            .match_body(Matcher::Json(json!({"task_id": 77})))
            .with_status(200)
            .with_body(
                json!({"result": {"items": [{"offer_id": "GOOD", "product_id": 0, "status": "imported"}]}})
                    .to_string(),
            )
            .create_async()
            .await;

        let store = Arc::new(InMemoryStore::new());
        let no_barcode = store
            .insert_item(&item("BAD", json!({"price": "1000"}), ItemChannelStatus::Submitted))
            .await
            .unwrap();
        let good = store
            .insert_item(&item(
                "GOOD",
                json!({"price": "1000", "barcode": "4600000000001"}),
                ItemChannelStatus::Submitted,
            ))
            .await
            .unwrap();
        let mut stray = item("STRAY", json!({}), ItemChannelStatus::Submitted);
        stray.path = "1.2".into();
        let stray = store.insert_item(&stray).await.unwrap();

        let h = handler(&server, store.clone(), 25);
        let log = run(&h, &channel(boots_mapping()), RunRequest::Full).await;
        assert!(log.contains("Found 3 items to process"), "{log}");

        let bad = store.get_item(no_barcode).await.unwrap().unwrap();
        let entry = &bad.channels["ozon"];
        assert_eq!(entry.status, ItemChannelStatus::Error);
        assert!(entry.message.contains("\"Barcode\""), "{}", entry.message);
        assert_eq!(entry.category.as_deref(), Some("cat_17"));

        let ok = store.get_item(good).await.unwrap().unwrap();
        assert_eq!(ok.channels["ozon"].status, ItemChannelStatus::PendingModeration);
        assert_eq!(ok.values["ozonId"], json!("task_id=77"));
        assert!(ok.channels["ozon"].synced_at.is_some());

        let stray = store.get_item(stray).await.unwrap().unwrap();
        assert_eq!(stray.channels["ozon"].status, ItemChannelStatus::Error);
        assert!(stray.channels["ozon"].message.contains("does not match any category"));

        import.assert_async().await;
        info.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_import_records_remote_errors() {
        let mut server = Server::new_async().await;
        let _import = server
            .mock("POST", "/v2/product/import")
            .with_status(200)
            .with_body(json!({"result": {"task_id": 5}}).to_string())
            .create_async()
            .await;
        let _info = server
            .mock("POST", "/v1/product/import/info")
            .with_status(200)
            .with_body(
                json!({"result": {"items": [{"product_id": 0, "status": "failed", "errors": [{"code": "bad_barcode"}]}]}})
                    .to_string(),
            )
            .create_async()
            .await;
        let store = Arc::new(InMemoryStore::new());
        let id = store
            .insert_item(&item(
                "X",
                json!({"price": "10", "barcode": "1"}),
                ItemChannelStatus::Submitted,
            ))
            .await
            .unwrap();
        let h = handler(&server, store.clone(), 25);
        run(&h, &channel(boots_mapping()), RunRequest::Full).await;

        let stored = store.get_item(id).await.unwrap().unwrap();
        let entry = &stored.channels["ozon"];
        assert_eq!(entry.status, ItemChannelStatus::Error);
        assert!(entry.message.starts_with("Errors: "));
        assert!(entry.message.contains("bad_barcode"));
        assert!(!stored.values.contains_key("ozonId"));
    }

    #[tokio::test]
    async fn submission_http_error_is_an_item_error() {
        let mut server = Server::new_async().await;
        let _import = server
            .mock("POST", "/v2/product/import")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let store = Arc::new(InMemoryStore::new());
        let id = store
            .insert_item(&item(
                "X",
                json!({"price": "10", "barcode": "1"}),
                ItemChannelStatus::Submitted,
            ))
            .await
            .unwrap();
        let h = handler(&server, store.clone(), 25);
        let log = run(&h, &channel(boots_mapping()), RunRequest::Full).await;
        assert!(log.contains("Ozon request error: Internal Server Error boom"), "{log}");
        let stored = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(stored.channels["ozon"].status, ItemChannelStatus::Error);
    }

    #[tokio::test]
    async fn sync_resolves_placeholder_then_reads_state() {
        let mut server = Server::new_async().await;
        let task = server
            .mock("POST", "/v1/product/import/info")
            .match_body(Matcher::Json(json!({"task_id": 123})))
            .with_status(200)
            .with_body(json!({"result": {"items": [{"product_id": 555, "status": "imported"}]}}).to_string())
            .create_async()
            .await;
        let product = server
            .mock("POST", "/v2/product/info")
            .match_body(Matcher::Json(json!({"product_id": 555})))
            .with_status(200)
            .with_body(
                json!({"result": {
                    "id": 555,
                    "price": "1000.0000",
                    "status": {"is_created": true, "is_failed": false, "moderate_status": "approved"},
                    "sources": [{"source": "fbs", "sku": 999}, {"source": "fbo", "sku": 998}],
                }})
                .to_string(),
            )
            .create_async()
            .await;

        let store = Arc::new(InMemoryStore::new());
        let id = store
            .insert_item(&item(
                "X",
                json!({"ozonId": "task_id=123"}),
                ItemChannelStatus::PendingModeration,
            ))
            .await
            .unwrap();
        let h = handler(&server, store.clone(), 25);
        run(&h, &channel(json!({})), RunRequest::Sync { item: None }).await;

        let stored = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(stored.values["ozonId"], json!(555));
        assert_eq!(stored.values["fbsSku"], json!(999));
        assert!(!stored.values.contains_key("fboSku"));
        assert_eq!(stored.channels["ozon"].status, ItemChannelStatus::Synced);
        task.assert_async().await;
        product.assert_async().await;
    }

    #[tokio::test]
    async fn sync_defers_until_product_id_is_known() {
        let mut server = Server::new_async().await;
        let _task = server
            .mock("POST", "/v1/product/import/info")
            .with_status(200)
            .with_body(json!({"result": {"items": [{"product_id": 0, "status": "pending"}]}}).to_string())
            .create_async()
            .await;
        let product = server
            .mock("POST", "/v2/product/info")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(InMemoryStore::new());
        let id = store
            .insert_item(&item(
                "X",
                json!({"ozonId": "task_id=123"}),
                ItemChannelStatus::PendingModeration,
            ))
            .await
            .unwrap();
        let h = handler(&server, store.clone(), 25);
        let log = run(&h, &channel(json!({})), RunRequest::Sync { item: None }).await;
        assert!(log.contains("pending product_id"), "{log}");

        let stored = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(stored.values["ozonId"], json!("task_id=123"));
        assert_eq!(stored.channels["ozon"].status, ItemChannelStatus::PendingModeration);
        product.assert_async().await;
    }

    #[tokio::test]
    async fn sync_skips_errored_items_unless_requested() {
        let mut server = Server::new_async().await;
        let product = server
            .mock("POST", "/v2/product/info")
            .with_status(200)
            .with_body(
                json!({"result": {"status": {"is_created": false, "is_failed": true}}}).to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let store = Arc::new(InMemoryStore::new());
        let id = store
            .insert_item(&item("X", json!({"ozonId": 7}), ItemChannelStatus::Error))
            .await
            .unwrap();
        let h = handler(&server, store.clone(), 25);
        let ch = channel(json!({}));

        let log = run(&h, &ch, RunRequest::Sync { item: None }).await;
        assert!(log.contains("skipping sync"), "{log}");

        run(&h, &ch, RunRequest::Sync { item: Some(id) }).await;
        let stored = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(stored.channels["ozon"].status, ItemChannelStatus::Error);
        assert!(stored.channels["ozon"].message.contains("is_failed"));
        product.assert_async().await;
    }

    #[tokio::test]
    async fn dictionary_is_fetched_once_within_ttl() {
        let mut server = Server::new_async().await;
        let dict = server
            .mock("POST", "/v2/category/attribute/values")
            .match_body(Matcher::PartialJson(json!({"attribute_id": 85, "category_id": 17, "last_value_id": 0})))
            .with_status(200)
            .with_body(
                json!({"result": [{"id": 1, "value": "Acme"}, {"id": 2, "value": "Globex"}], "has_next": false})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let store = Arc::new(InMemoryStore::new());
        let h = handler(&server, store, 25);

        for _ in 0..2 {
            let value = h
                .attribute_value(&creds(), 17, 85, true, &json!("Globex"), &[])
                .await
                .unwrap();
            assert_eq!(value, Some(json!({"dictionary_value_id": 2, "value": "Globex"})));
        }
        let missing = h
            .attribute_value(&creds(), 17, 85, true, &json!("Initech"), &[])
            .await
            .unwrap();
        assert_eq!(missing, None);
        dict.assert_async().await;
    }

    #[tokio::test]
    async fn explicit_options_bypass_the_dictionary() {
        let server = Server::new_async().await;
        let h = handler(&server, Arc::new(InMemoryStore::new()), 25);
        let options = vec![MappingOption {
            name: json!("red"),
            value: json!(61571),
        }];
        let value = h
            .attribute_value(&creds(), 17, 10096, true, &json!("red"), &options)
            .await
            .unwrap();
        assert_eq!(value, Some(json!({"dictionary_value_id": 61571, "value": "red"})));

        let plain = h
            .attribute_value(&creds(), 17, 4191, false, &json!(42), &[])
            .await
            .unwrap();
        assert_eq!(plain, Some(json!({"value": "42"})));
    }

    #[tokio::test]
    async fn oversized_dictionary_fails_fast() {
        let mut server = Server::new_async().await;
        let pages = server
            .mock("POST", "/v2/category/attribute/values")
            .with_status(200)
            .with_body(json!({"result": [{"id": 9, "value": "x"}], "has_next": true}).to_string())
            .expect(2)
            .create_async()
            .await;
        let h = handler(&server, Arc::new(InMemoryStore::new()), 2);

        for _ in 0..2 {
            let err = h
                .attribute_value(&creds(), 17, 85, true, &json!("x"), &[])
                .await
                .unwrap_err();
            assert!(matches!(err, Error::DictionaryOversized { .. }), "{err}");
        }
        pages.assert_async().await;
    }

    #[tokio::test]
    async fn clear_cache_drops_schema() {
        let mut server = Server::new_async().await;
        let tree = server
            .mock("POST", "/v2/category/tree")
            .with_status(200)
            .with_body(
                json!({"result": [{"category_id": 1, "title": "Shoes", "children": [
                    {"category_id": 17, "title": "Boots", "children": []}
                ]}]})
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;
        let h = handler(&server, Arc::new(InMemoryStore::new()), 25);
        let ch = channel(json!({}));

        let first = h.categories(&ch).await.unwrap();
        let ids: Vec<_> = first[0].walk().iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, ["", "cat_1", "cat_17"]);
        h.categories(&ch).await.unwrap();

        let log = run(&h, &ch, RunRequest::ClearCache).await;
        assert_eq!(log, "Cache cleared\n");
        h.categories(&ch).await.unwrap();
        tree.assert_async().await;
    }

    #[tokio::test]
    async fn attribute_schema_is_labelled() {
        let mut server = Server::new_async().await;
        let _attrs = server
            .mock("POST", "/v3/category/attribute")
            .match_body(Matcher::PartialJson(json!({"category_id": [17]})))
            .with_status(200)
            .with_body(
                json!({"result": [{"category_id": 17, "attributes": [
                    {"id": 85, "name": "Brand", "type": "String", "is_required": true, "dictionary_id": 28732849, "description": "Brand name"},
                    {"id": 4191, "name": "Annotation", "type": "String", "dictionary_id": 0},
                ]}]})
                .to_string(),
            )
            .create_async()
            .await;
        let h = handler(&server, Arc::new(InMemoryStore::new()), 25);
        let attrs = h.attributes(&channel(json!({})), "cat_17").await.unwrap();
        assert_eq!(attrs[0].id, "attr_85");
        assert_eq!(attrs[0].name, "Brand (String)");
        assert!(attrs[0].required && attrs[0].dictionary);
        assert!(!attrs[1].dictionary);
        assert_eq!(attrs[1].category, "cat_17");
    }

    #[tokio::test]
    async fn attribute_schema_rejects_foreign_category_ids() {
        let server = Server::new_async().await;
        let h = handler(&server, Arc::new(InMemoryStore::new()), 25);
        let err = h.attributes(&channel(json!({})), "17").await.unwrap_err();
        assert!(err.to_string().contains("Invalid Ozon category id: 17"), "{err}");
    }
}
