//! Test fixtures and factories.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use tierq_queue::config::QueueConfig;
use tierq_queue::error::{Error, Result};
use tierq_queue::policy::{BlockInfo, InputDataset, SplittingSpec, StartPolicy, TaskSpec, WorkloadSpec};
use tierq_queue::queue::WorkQueue;
use tierq_queue::sites::ResourceCatalog;
use tierq_queue::store::memory::InMemoryInbox;
use tierq_split::file::InputFile;

use crate::storage::TracingElementStore;

/// Site every fixture block is hosted at unless stated otherwise.
pub const DEFAULT_SITE: &str = "T2_XX_Default";

/// Factory for workload documents.
pub struct WorkloadFactory;

impl WorkloadFactory {
    /// A one-task re-reconstruction workload with `blocks` blocks of five
    /// files each, hosted at [`DEFAULT_SITE`], lumi-based splitting.
    pub fn rereco(blocks: usize) -> WorkloadSpec {
        Self::rereco_at(blocks, &[DEFAULT_SITE])
    }

    /// Like [`Self::rereco`] with blocks hosted at `sites`.
    pub fn rereco_at(blocks: usize, sites: &[&str]) -> WorkloadSpec {
        WorkloadSpec {
            name: "ReReco".to_string(),
            priority: None,
            tasks: vec![TaskSpec {
                name: "DataProcessing".to_string(),
                input_dataset: InputDataset {
                    name: "/MinimumBias/Run2024A-v1/RAW".to_string(),
                    blocks: (0..blocks)
                        .map(|i| BlockInfo {
                            name: format!("/MinimumBias/Run2024A-v1/RAW#{i:04}"),
                            files: 5,
                            events: 5_000,
                            lumis: 50,
                            locations: sites.iter().map(ToString::to_string).collect(),
                        })
                        .collect(),
                },
                splitting: SplittingSpec {
                    algorithm: "LumiBased".to_string(),
                    params: json!({"lumis_per_job": 10, "splitOnRun": true})
                        .as_object()
                        .cloned()
                        .expect("object"),
                },
                site_whitelist: Vec::new(),
                site_blacklist: Vec::new(),
                lumi_mask: None,
            }],
            start_policy: StartPolicy::default(),
        }
    }

    /// Sets an explicit priority.
    pub fn with_priority(mut workload: WorkloadSpec, priority: i64) -> WorkloadSpec {
        workload.priority = Some(priority);
        workload
    }

    /// Sets the site lists of every task.
    pub fn with_sites(
        mut workload: WorkloadSpec,
        whitelist: &[&str],
        blacklist: &[&str],
    ) -> WorkloadSpec {
        for task in &mut workload.tasks {
            task.site_whitelist = whitelist.iter().map(ToString::to_string).collect();
            task.site_blacklist = blacklist.iter().map(ToString::to_string).collect();
        }
        workload
    }
}

/// Factory for splitter input files.
pub struct FileFactory;

impl FileFactory {
    /// `n_files` files; file `i` holds run `i` with lumis `100*i .. 100*i + lumis_per_file`.
    ///
    /// Files are spread round-robin over `locations`.
    pub fn lumi_files(n_files: u32, lumis_per_file: u32, locations: &[&str]) -> Vec<InputFile> {
        (0..n_files)
            .map(|i| {
                let location = locations[i as usize % locations.len()];
                InputFile::new(format!("/store/data/file_{i}.root"), 1000)
                    .with_run(i, (0..lumis_per_file).map(|l| 100 * i + l))
                    .with_location(location)
            })
            .collect()
    }
}

/// Resource catalog backed by fixed maps.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    storage: HashMap<String, Vec<String>>,
    compute: HashMap<String, Vec<String>>,
}

impl StaticCatalog {
    /// Creates an empty catalog; every lookup returns no names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a site's storage and compute element names.
    #[must_use]
    pub fn with_site(mut self, site: &str, storage: &[&str], compute: &[&str]) -> Self {
        self.storage.insert(
            site.to_string(),
            storage.iter().map(ToString::to_string).collect(),
        );
        self.compute.insert(
            site.to_string(),
            compute.iter().map(ToString::to_string).collect(),
        );
        self
    }
}

#[async_trait]
impl ResourceCatalog for StaticCatalog {
    async fn site_name_to_storage_element(&self, site: &str) -> Result<Vec<String>> {
        Ok(self.storage.get(site).cloned().unwrap_or_default())
    }

    async fn site_name_to_compute_element(&self, site: &str) -> Result<Vec<String>> {
        Ok(self.compute.get(site).cloned().unwrap_or_default())
    }
}

/// Resource catalog whose every lookup fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCatalog;

#[async_trait]
impl ResourceCatalog for FailingCatalog {
    async fn site_name_to_storage_element(&self, site: &str) -> Result<Vec<String>> {
        Err(Error::catalog(format!("catalog unavailable for {site}")))
    }

    async fn site_name_to_compute_element(&self, site: &str) -> Result<Vec<String>> {
        Err(Error::catalog(format!("catalog unavailable for {site}")))
    }
}

/// A global queue with local children, each on its own stores.
pub struct QueueFixture {
    /// The global queue.
    pub global: WorkQueue,
    /// Element store of the global queue.
    pub global_store: TracingElementStore,
    /// Local queues, in the order they were named.
    pub locals: Vec<WorkQueue>,
    /// Element stores of the local queues.
    pub local_stores: Vec<TracingElementStore>,
}

impl QueueFixture {
    /// Builds a global queue and one local queue per name, all using an
    /// empty [`StaticCatalog`].
    pub fn new(local_names: &[&str]) -> Self {
        Self::with_catalog(local_names, Arc::new(StaticCatalog::new()))
    }

    /// Builds the hierarchy with a shared catalog.
    pub fn with_catalog(local_names: &[&str], catalog: Arc<dyn ResourceCatalog>) -> Self {
        let global_store = TracingElementStore::new();
        let global = WorkQueue::global(
            QueueConfig::new("global"),
            Arc::new(global_store.clone()),
            Arc::new(InMemoryInbox::new()),
            Arc::clone(&catalog),
        )
        .expect("valid global config");

        let mut locals = Vec::new();
        let mut local_stores = Vec::new();
        for name in local_names {
            let store = TracingElementStore::new();
            let local = WorkQueue::local(
                QueueConfig::new(*name),
                global.as_parent(),
                Arc::new(store.clone()),
                Arc::new(InMemoryInbox::new()),
                Arc::clone(&catalog),
            )
            .expect("valid local config");
            locals.push(local);
            local_stores.push(store);
        }

        Self {
            global,
            global_store,
            locals,
            local_stores,
        }
    }

    /// Runs one replication round for local `index`: sync with the parent,
    /// then merge the inbox.
    pub async fn sync_local(&self, index: usize) {
        let local = &self.locals[index];
        local.pull_from_parent().await.expect("pull_from_parent");
        local.process_inbound_work().await.expect("process_inbound_work");
    }

    /// Reports local changes up and merges them into the global queue.
    pub async fn report_up(&self, index: usize) {
        self.sync_local(index).await;
        self.global
            .process_inbound_work()
            .await
            .expect("global process_inbound_work");
    }
}

/// Free slots for the given sites.
pub fn slots(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
    pairs.iter().map(|(s, n)| ((*s).to_string(), *n)).collect()
}

/// Names as an owned set.
pub fn name_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(ToString::to_string).collect()
}
