//! Message handling pipeline: extract, admit, resolve.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::gallery::{GalleryApi, GalleryMetadata, GalleryResolver, LinkExtractor};
use crate::limits::{AdmissionControl, Clock, Rejection};

/// A chat message as delivered by the transport.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    /// Sender identity
    pub sender: &'a str,
    /// Room identity
    pub room: &'a str,
    /// Message text
    pub body: &'a str,
    /// Whether this is an edit of an earlier message
    pub edited: bool,
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Sender is ignored or the message is an edit
    Ignored,
    /// No links, or more links than the batch ceiling
    NoLinks,
    /// Refused by admission control
    Rejected(Rejection),
    /// Resolved galleries in link order, possibly empty
    Galleries(Vec<GalleryMetadata>),
}

impl Outcome {
    /// Galleries to respond with, empty for every other outcome.
    #[must_use]
    pub fn into_galleries(self) -> Vec<GalleryMetadata> {
        match self {
            Self::Galleries(galleries) => galleries,
            Self::Ignored | Self::NoLinks | Self::Rejected(_) => Vec::new(),
        }
    }
}

/// Composes extraction, admission control and resolution.
pub struct Pipeline {
    extractor: LinkExtractor,
    admission: AdmissionControl,
    resolver: GalleryResolver,
    ignored_senders: HashSet<String>,
}

impl Pipeline {
    /// Creates a pipeline from its parts.
    #[must_use]
    pub fn new(admission: AdmissionControl, api: Arc<dyn GalleryApi>) -> Self {
        Self {
            extractor: LinkExtractor::new(),
            admission,
            resolver: GalleryResolver::new(api),
            ignored_senders: HashSet::new(),
        }
    }

    /// Creates a pipeline with the limits and denylist from `settings`.
    #[must_use]
    pub fn from_settings(
        settings: &Settings,
        api: Arc<dyn GalleryApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let eviction = settings.eviction();
        let admission = settings
            .limit_policies()
            .into_iter()
            .fold(AdmissionControl::new(clock), |control, (scope, policy)| {
                control.with_limit(scope, policy, eviction)
            });

        Self::new(admission, api).with_ignored_senders(settings.blacklist())
    }

    /// Adds senders whose messages are never handled.
    #[must_use]
    pub fn with_ignored_senders<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_senders
            .extend(senders.into_iter().map(Into::into));
        self
    }

    /// Admission control used by this pipeline.
    #[must_use]
    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    /// Handles one message.
    pub async fn handle(&self, message: &InboundMessage<'_>) -> Outcome {
        if message.edited || self.ignored_senders.contains(message.sender) {
            return Outcome::Ignored;
        }

        let extraction = self.extractor.extract(message.body);
        if extraction.is_empty() {
            return Outcome::NoLinks;
        }

        let demand = extraction.demand();
        if let Err(rejection) = self
            .admission
            .admit(message.sender, message.room, demand)
            .await
        {
            return Outcome::Rejected(rejection);
        }

        debug!(
            "Resolving {} galleries ({} pages) for {} in {}",
            extraction.gallery_count(),
            extraction.pages.len(),
            message.sender,
            message.room
        );
        let galleries = self.resolver.resolve(extraction).await;
        if !galleries.is_empty() {
            info!(
                "Responding with metadata of {} galleries in {}",
                galleries.len(),
                message.room
            );
        }
        Outcome::Galleries(galleries)
    }
}
