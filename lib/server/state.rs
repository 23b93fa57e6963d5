//! Server state management.
//!
//! The state wires the stores, catalogs, cache ledger, and (when enabled)
//! the pull-through proxy into one cloneable handle shared across request
//! handlers.

use std::sync::Arc;

use getset::Getters;

use crate::{
    config::Portside,
    helm::{ChartCatalog, YamlRepoIndex},
    proxy::{CacheLedger, RegistryProxy},
    store::{BlobStore, ImageCatalog, ManifestStore, StoreLayout},
    PortsideResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared server state handed to every request handler.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ServerState {
    /// The loaded configuration.
    config: Arc<Portside>,

    /// The content-addressed blob store.
    blobs: BlobStore,

    /// The manifest store.
    manifests: ManifestStore,

    /// The image metadata catalog.
    images: ImageCatalog,

    /// The chart catalog.
    charts: ChartCatalog,

    /// The cache accounting ledger.
    ledger: Arc<CacheLedger>,

    /// The pull-through engine; absent when proxying is disabled.
    proxy: Option<Arc<RegistryProxy>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerState {
    /// Creates the state: builds the storage skeleton and wires every
    /// component over it.
    pub async fn new(config: Portside) -> PortsideResult<Self> {
        let layout = StoreLayout::create(config.get_storage().get_path().clone()).await?;

        let blobs = BlobStore::new(layout.clone());
        let manifests = ManifestStore::new(layout.clone(), blobs.clone());
        let images = ImageCatalog::new(layout.clone(), blobs.clone());

        let charts = ChartCatalog::new(layout.clone(), blobs.clone());
        // The index writer needs the layout the catalog was built over, so
        // it is wired after construction
        charts.set_index_writer(Arc::new(YamlRepoIndex::new(layout.clone())));

        let ledger = Arc::new(CacheLedger::new(
            layout,
            *config.get_proxy().get_cache().get_max_size_gb(),
        ));

        let proxy = (*config.get_proxy().get_enabled()).then(|| {
            Arc::new(RegistryProxy::new(
                config.get_proxy(),
                blobs.clone(),
                manifests.clone(),
                images.clone(),
                charts.clone(),
                ledger.clone(),
            ))
        });

        Ok(Self {
            config: Arc::new(config),
            blobs,
            manifests,
            images,
            charts,
            ledger,
            proxy,
        })
    }
}
