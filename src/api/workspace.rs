// src/api/workspace.rs

use super::cancel::CancellationToken;
use super::iter::BoxEvents;
use crate::core::boxes::split::split_leaf;
use crate::core::boxes::{BoxArena, BoxState, BoxTotals, EventBuffer, MdBox};
use crate::core::common::{BoxId, MdStoreError};
use crate::core::config::WorkspaceConfig;
use crate::core::controller::BoxController;
use crate::core::dimension::Dimension;
use crate::core::event::{decode_block, encode_block, Event, MAX_DIMENSIONS};
use crate::core::geometry::{validate_region, Extents};
use crate::core::storage::engine::{
    DiskBackend, DiskBackendHandle, DiskBlock, EvictionCandidate, FileDiskBackend,
    InMemoryDiskBackend,
};
use crate::core::storage::persistence::{
    read_table, BoxContent, BoxTable, PersistedBox, SnapshotWriter, TableHeader,
};
use crate::core::validation::{self, sums_match, InvariantReport, TreeStats};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Events handed to `add_transformed` are inserted in batches of this size.
const TRANSFORM_BATCH: usize = 4096;

/// What the iterator finds at a box.
pub(crate) enum Visit {
    Children(Vec<BoxId>),
    Events(Vec<Event>),
}

/// Point-in-time view of one box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxSummary {
    pub id: BoxId,
    pub parent: Option<BoxId>,
    pub depth: u32,
    pub extents: Extents,
    pub is_leaf: bool,
    pub is_resident: bool,
    pub at_max_depth: bool,
    pub signal: f64,
    pub error_squared: f64,
    pub n_points: u64,
    pub children: Vec<BoxId>,
}

/// An N-dimensional event store that adaptively subdivides itself.
///
/// All operations except loading take `&self`; a workspace can be shared between threads
/// (for example behind an `Arc` or in a scoped thread) and fed concurrently.
#[derive(Debug)]
pub struct EventWorkspace {
    dimensions: Vec<Dimension>,
    extents: Extents,
    config: WorkspaceConfig,
    controller: BoxController,
    arena: BoxArena,
    source: Option<PathBuf>,
    rejected: AtomicU64,
}

impl EventWorkspace {
    /// Creates an in-memory workspace.
    ///
    /// # Errors
    /// `Dimensionality` when `nd` is zero or above [`MAX_DIMENSIONS`]; `Configuration` when
    /// the dimensions or split settings are unusable.
    pub fn create(
        nd: usize,
        dimensions: Vec<Dimension>,
        split_threshold: usize,
        split_factor: u32,
        max_depth: u32,
    ) -> Result<Self, MdStoreError> {
        check_dimensionality(nd)?;
        if dimensions.len() != nd {
            return Err(MdStoreError::Configuration(format!(
                "{} dimensions given for a {}-dimensional workspace",
                dimensions.len(),
                nd
            )));
        }
        let config = WorkspaceConfig::builder()
            .split_threshold(split_threshold)
            .split_factor(split_factor)
            .max_depth(max_depth)
            .build()?;
        Self::with_config(dimensions, config, Arc::new(InMemoryDiskBackend::new()))
    }

    /// Creates a workspace with full control over policy and storage.
    pub fn with_config(
        dimensions: Vec<Dimension>,
        config: WorkspaceConfig,
        backend: DiskBackendHandle,
    ) -> Result<Self, MdStoreError> {
        let nd = dimensions.len();
        check_dimensionality(nd)?;
        for dim in &dimensions {
            dim.validate()?;
        }
        let controller = BoxController::new(&config, nd, backend)?;
        let extents = Extents::from_dimensions(&dimensions);
        let root = MdBox::new_leaf(BoxId::ROOT, 0, None, extents.clone(), config.max_depth);

        log::info!(
            "created {}-dimensional workspace (threshold {}, factor {}, max depth {}) on {}",
            nd,
            config.split_threshold,
            config.split_factor,
            config.max_depth,
            controller.backend().describe()
        );
        Ok(Self {
            dimensions,
            extents,
            config,
            controller,
            arena: BoxArena::with_root(root),
            source: None,
            rejected: AtomicU64::new(0),
        })
    }

    pub fn nd(&self) -> usize {
        self.dimensions.len()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub const fn extents(&self) -> &Extents {
        &self.extents
    }

    pub const fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub const fn controller(&self) -> &BoxController {
        &self.controller
    }

    pub const fn root_id(&self) -> BoxId {
        BoxId::ROOT
    }

    /// File a file-backed workspace was loaded from.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn root(&self) -> Result<Arc<MdBox>, MdStoreError> {
        self.arena.get(BoxId::ROOT)
    }

    pub fn total_signal(&self) -> Result<f64, MdStoreError> {
        Ok(self.root()?.signal())
    }

    pub fn total_error_squared(&self) -> Result<f64, MdStoreError> {
        Ok(self.root()?.error_squared())
    }

    pub fn n_points(&self) -> Result<u64, MdStoreError> {
        Ok(self.root()?.n_points())
    }

    pub fn n_boxes(&self) -> usize {
        self.arena.len()
    }

    /// Inserts a batch and returns how many events were stored.
    ///
    /// Events outside the workspace, with non-finite coordinates or the wrong arity are
    /// skipped, logged at warn level and counted in [`TreeStats::rejected_events`]. An error aborts the rest of the batch; events stored before it stay stored.
    pub fn add_events(&self, batch: &[Event]) -> Result<usize, MdStoreError> {
        self.insert_batch(batch, None)
    }

    /// Like [`EventWorkspace::add_events`], polling `token` every
    /// `cancellation_check_interval` events.
    ///
    /// # Errors
    /// `Cancelled { committed }` once the token is observed.
    pub fn add_events_cancellable(
        &self,
        batch: &[Event],
        token: &CancellationToken,
    ) -> Result<usize, MdStoreError> {
        self.insert_batch(batch, Some(token))
    }

    /// Maps raw records to events through `transform` and inserts them.
    ///
    /// The transform owns all unit handling. A transform error stops the insertion.
    pub fn add_transformed<R, I, F>(&self, raws: I, mut transform: F) -> Result<usize, MdStoreError>
    where
        I: IntoIterator<Item = R>,
        F: FnMut(R) -> Result<Event, MdStoreError>,
    {
        let mut stored = 0;
        let mut batch = Vec::with_capacity(TRANSFORM_BATCH);
        for raw in raws {
            batch.push(transform(raw)?);
            if batch.len() == TRANSFORM_BATCH {
                stored += self.add_events(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            stored += self.add_events(&batch)?;
        }
        Ok(stored)
    }

    fn insert_batch(
        &self,
        batch: &[Event],
        token: Option<&CancellationToken>,
    ) -> Result<usize, MdStoreError> {
        let interval = self.config.cancellation_check_interval;
        let mut stored = 0;
        let mut rejected = 0;
        let mut path = Vec::new();

        for (index, event) in batch.iter().enumerate() {
            if index % interval == 0 {
                if token.is_some_and(CancellationToken::is_cancelled) {
                    log::info!("insertion cancelled after {} of {} events", stored, batch.len());
                    self.rejected.fetch_add(rejected, Ordering::Relaxed);
                    self.enforce_residency()?;
                    return Err(MdStoreError::Cancelled { committed: stored });
                }
                self.enforce_residency()?;
            }
            if self.insert_event(event, &mut path)? {
                stored += 1;
            } else {
                rejected += 1;
            }
        }

        if rejected > 0 {
            self.rejected.fetch_add(rejected, Ordering::Relaxed);
            log::warn!(
                "rejected {} of {} events (outside the workspace, non-finite or wrong arity)",
                rejected,
                batch.len()
            );
        }
        self.enforce_residency()?;
        Ok(stored)
    }

    /// Descends from the root to the leaf owning `event` and appends it there.
    fn insert_event(&self, event: &Event, path: &mut Vec<Arc<MdBox>>) -> Result<bool, MdStoreError> {
        if event.nd() != self.nd()
            || !event.has_finite_coords()
            || !self.extents.contains_point(event.coords())
        {
            return Ok(false);
        }

        path.clear();
        let factor = self.controller.split_factor();
        let mut current = self.root()?;
        loop {
            let mut state = current.lock_state()?;
            let next = match &*state {
                BoxState::Grid(children) => {
                    Some(children[current.extents().child_index(event.coords(), factor)])
                }
                BoxState::Leaf(_) => None,
            };
            if let Some(child) = next {
                drop(state);
                path.push(current);
                current = self.arena.get(child)?;
                continue;
            }

            current.push_event(&mut state, *event, &self.controller)?;
            let error_squared = event.error_squared();
            for ancestor in path.iter() {
                ancestor.add_totals(event.signal, error_squared, 1);
            }
            if self.controller.split_on_insert() {
                self.split_or_warn(&current, &mut state, &mut Vec::new())?;
            }
            return Ok(true);
        }
    }

    /// Splits every over-threshold leaf until the tree is stable and returns the number of
    /// splits performed. Running it again on an unchanged tree does nothing.
    pub fn split_all_if_needed(&self) -> Result<usize, MdStoreError> {
        let threads = self.config.split_threads;
        let mut splits = 0;
        let mut frontier = vec![BoxId::ROOT];

        // Breadth-first until every worker has an independent subtree.
        while threads > 1 && !frontier.is_empty() && frontier.len() < threads {
            let mut next = Vec::new();
            for id in frontier.drain(..) {
                splits += self.split_box_if_needed(id, &mut next)?;
            }
            frontier = next;
        }

        if threads <= 1 || frontier.len() <= 1 {
            splits += self.split_subtrees(frontier)?;
        } else {
            let chunk = frontier.len().div_ceil(threads);
            let results: Vec<Result<usize, MdStoreError>> = thread::scope(|scope| {
                let workers: Vec<_> = frontier
                    .chunks(chunk)
                    .map(|ids| scope.spawn(move || self.split_subtrees(ids.to_vec())))
                    .collect();
                workers
                    .into_iter()
                    .map(|worker| {
                        worker.join().unwrap_or_else(|_| {
                            Err(MdStoreError::Lock("split worker panicked".to_string()))
                        })
                    })
                    .collect()
            });
            for result in results {
                splits += result?;
            }
        }

        self.enforce_residency()?;
        if splits > 0 {
            log::info!("split pass performed {} splits, {} boxes in tree", splits, self.arena.len());
        }
        Ok(splits)
    }

    fn split_subtrees(&self, mut pending: Vec<BoxId>) -> Result<usize, MdStoreError> {
        let mut splits = 0;
        while let Some(id) = pending.pop() {
            splits += self.split_box_if_needed(id, &mut pending)?;
            if self.controller.residency().over_budget() {
                self.enforce_residency()?;
            }
        }
        Ok(splits)
    }

    /// Splits `id` if it needs it and queues the children of whatever it is afterwards.
    fn split_box_if_needed(&self, id: BoxId, queue: &mut Vec<BoxId>) -> Result<usize, MdStoreError> {
        let md_box = self.arena.get(id)?;
        let mut state = md_box.lock_state()?;
        if let BoxState::Grid(children) = &*state {
            queue.extend_from_slice(children);
            return Ok(0);
        }
        self.split_or_warn(&md_box, &mut state, queue)
    }

    fn split_or_warn(
        &self,
        md_box: &MdBox,
        state: &mut BoxState,
        queue: &mut Vec<BoxId>,
    ) -> Result<usize, MdStoreError> {
        if self.controller.should_split(md_box) {
            queue.extend(split_leaf(md_box, state, &self.controller, &self.arena)?);
            return Ok(1);
        }
        let threshold = self.controller.split_threshold();
        if md_box.is_leaf() && md_box.is_at_max_depth() && md_box.event_count() > threshold {
            md_box.warn_at_depth_limit(threshold);
        }
        Ok(0)
    }

    /// Flushes least-recently-used leaves until the resident total fits the budget.
    ///
    /// Leaves held by other threads are skipped, so the total may stay above budget until
    /// the next call.
    pub(crate) fn enforce_residency(&self) -> Result<(), MdStoreError> {
        let residency = self.controller.residency();
        if !residency.over_budget() {
            return Ok(());
        }
        let candidates: Vec<EvictionCandidate> = self
            .arena
            .snapshot()?
            .iter()
            .filter(|b| b.is_leaf() && b.resident_events() > 0)
            .map(|b| EvictionCandidate {
                id: b.id(),
                last_access: b.last_access(),
                resident_events: b.resident_events(),
            })
            .collect();

        let (mut evicted, mut busy) = (0usize, 0usize);
        for candidate in residency.plan_evictions(candidates) {
            if !residency.over_budget() {
                break;
            }
            if self.arena.get(candidate.id)?.try_evict(&self.controller)? {
                evicted += 1;
            } else {
                busy += 1;
            }
        }
        log::trace!(
            "evicted {} leaves ({} busy), {} events resident",
            evicted,
            busy,
            residency.resident_events()
        );
        Ok(())
    }

    /// Writes every resident, non-empty, idle leaf to the backend and syncs it.
    /// Returns the number of leaves written.
    pub fn flush(&self) -> Result<usize, MdStoreError> {
        let mut evicted = 0;
        for md_box in self.arena.snapshot()? {
            if md_box.is_leaf() && md_box.try_evict(&self.controller)? {
                evicted += 1;
            }
        }
        self.controller.flush()?;
        log::debug!("flushed {} leaves to {}", evicted, self.controller.backend().describe());
        Ok(evicted)
    }

    /// Ids of every box intersecting the closed `region`, in pre-order.
    pub fn get_boxes_in_region(&self, region: &Extents) -> Result<Vec<BoxId>, MdStoreError> {
        validate_region(region, self.nd())?;
        let mut found = Vec::new();
        let mut pending = vec![BoxId::ROOT];
        while let Some(id) = pending.pop() {
            let md_box = self.arena.get(id)?;
            if !md_box.extents().intersects_region(region) {
                continue;
            }
            found.push(id);
            if let Some(children) = md_box.children()? {
                pending.extend(children.into_iter().rev());
            }
        }
        Ok(found)
    }

    /// Ids of all leaves, in pre-order.
    pub fn leaf_ids(&self) -> Result<Vec<BoxId>, MdStoreError> {
        let mut leaves = Vec::new();
        let mut pending = vec![BoxId::ROOT];
        while let Some(id) = pending.pop() {
            match self.arena.get(id)?.children()? {
                Some(children) => pending.extend(children.into_iter().rev()),
                None => leaves.push(id),
            }
        }
        Ok(leaves)
    }

    pub fn box_summary(&self, id: BoxId) -> Result<BoxSummary, MdStoreError> {
        let md_box = self.arena.get(id)?;
        let state = md_box.lock_state()?;
        let (is_resident, children) = match &*state {
            BoxState::Grid(children) => (false, children.clone()),
            BoxState::Leaf(buffer) => (buffer.is_resident(), Vec::new()),
        };
        Ok(BoxSummary {
            id,
            parent: md_box.parent(),
            depth: md_box.depth(),
            extents: md_box.extents().clone(),
            is_leaf: md_box.is_leaf(),
            is_resident,
            at_max_depth: md_box.is_at_max_depth(),
            signal: md_box.signal(),
            error_squared: md_box.error_squared(),
            n_points: md_box.n_points(),
            children,
        })
    }

    /// Lazy access to every event stored below `id`.
    pub fn events(&self, id: BoxId) -> Result<BoxEvents<'_>, MdStoreError> {
        if !self.arena.contains(id) {
            return Err(MdStoreError::BoxNotFound(id));
        }
        Ok(BoxEvents::new(self, id))
    }

    pub(crate) fn visit(&self, id: BoxId) -> Result<Visit, MdStoreError> {
        let md_box = self.arena.get(id)?;
        match md_box.read_events(&self.controller)? {
            Some(events) => {
                self.enforce_residency()?;
                Ok(Visit::Events(events))
            }
            None => Ok(Visit::Children(md_box.children()?.unwrap_or_default())),
        }
    }

    pub fn stats(&self) -> Result<TreeStats, MdStoreError> {
        let mut stats = validation::collect_stats(&self.arena, &self.controller)?;
        stats.rejected_events = self.rejected.load(Ordering::Relaxed);
        Ok(stats)
    }

    /// Checks the structural invariants of the tree. Meant for a quiescent workspace.
    pub fn check_invariants(&self) -> Result<InvariantReport, MdStoreError> {
        validation::check_tree(&self.arena, &self.controller, &self.extents)
    }

    /// Writes a complete snapshot to `path`.
    ///
    /// Leaf totals are recomputed from the events written, so the file is self-consistent.
    /// Splits must not run concurrently with a save.
    ///
    /// Saving a file-backed workspace over its own source replaces the file by rename. The
    /// workspace keeps the replaced file open as its backend, so later evictions and reads
    /// still work; its blocks are released once the workspace is dropped. Reload the path to
    /// back the workspace by the new snapshot.
    pub fn save(&self, path: &Path) -> Result<(), MdStoreError> {
        let nd = self.nd();
        let writer = SnapshotWriter::create(path)?;
        let boxes = self.arena.snapshot()?;
        let mut persisted: Vec<PersistedBox> = Vec::with_capacity(boxes.len());

        for md_box in &boxes {
            if md_box.id().index() != persisted.len() {
                return Err(MdStoreError::invalid_input(format!(
                    "box {} is still being published; save needs a quiescent workspace",
                    persisted.len()
                )));
            }
            let state = md_box.lock_state()?;
            let (content, totals) = match &*state {
                BoxState::Grid(children) => (BoxContent::Children(children.clone()), BoxTotals::default()),
                BoxState::Leaf(EventBuffer::Resident(events)) => write_leaf(&writer, events, nd)?,
                BoxState::Leaf(EventBuffer::OnDisk { block, count }) => {
                    let events = self.controller.read_events(*block, *count)?;
                    write_leaf(&writer, &events, nd)?
                }
            };
            drop(state);
            persisted.push(PersistedBox {
                id: md_box.id(),
                parent: md_box.parent(),
                depth: md_box.depth(),
                extents: md_box.extents().clone(),
                signal: totals.signal,
                error_squared: totals.error_squared,
                n_points: totals.n_points,
                content,
            });
        }

        // Children always carry larger ids than their parent.
        for index in (0..persisted.len()).rev() {
            let rolled_up = match &persisted[index].content {
                BoxContent::Children(children) => {
                    let mut sum = BoxTotals::default();
                    for child in children {
                        let child = persisted.get(child.index()).ok_or_else(|| {
                            MdStoreError::invalid_input(format!(
                                "child {child} was created during save"
                            ))
                        })?;
                        sum = sum.merge(BoxTotals {
                            signal: child.signal,
                            error_squared: child.error_squared,
                            n_points: child.n_points,
                        });
                    }
                    Some(sum)
                }
                BoxContent::Events { .. } => None,
            };
            if let Some(sum) = rolled_up {
                let entry = &mut persisted[index];
                entry.signal = sum.signal;
                entry.error_squared = sum.error_squared;
                entry.n_points = sum.n_points;
            }
        }

        let total_events = persisted.first().map_or(0, |root| root.n_points);
        let table = BoxTable {
            header: TableHeader {
                nd,
                dimensions: self.dimensions.clone(),
                split_threshold: self.config.split_threshold,
                split_factor: self.config.split_factor,
                max_depth: self.config.max_depth,
                split_on_insert: self.config.split_on_insert,
                next_id: self.controller.next_id(),
                total_events,
                saved_at: Utc::now(),
            },
            boxes: persisted,
        };
        table.validate()?;
        let size = writer.commit(&table)?;
        log::info!(
            "saved {} boxes and {} events to '{}' ({} bytes)",
            table.boxes.len(),
            total_events,
            path.display(),
            size
        );
        if self.source.as_deref() == Some(path) {
            log::debug!(
                "'{}' was replaced; the workspace stays backed by the previous file",
                path.display()
            );
        }
        Ok(())
    }

    /// Opens a snapshot with the default process settings.
    pub fn load(path: &Path, file_backed: bool) -> Result<Self, MdStoreError> {
        Self::load_with_config(path, file_backed, &WorkspaceConfig::default())
    }

    /// Opens a snapshot.
    ///
    /// The saved split policy always wins; `base` supplies the residency budget, the
    /// cancellation interval and the split thread count. A file-backed workspace keeps the
    /// file open for writing as its backend and reads leaves on first access. Otherwise the
    /// file is opened read-only, every leaf is read up front and the workspace lives in
    /// memory.
    pub fn load_with_config(
        path: &Path,
        file_backed: bool,
        base: &WorkspaceConfig,
    ) -> Result<Self, MdStoreError> {
        let source = Arc::new(if file_backed {
            FileDiskBackend::open_existing(path)?
        } else {
            FileDiskBackend::open_read_only(path)?
        });
        let table = read_table(source.as_ref())?;
        let config = table.header.config_over(base);
        let nd = table.header.nd;
        let backend: DiskBackendHandle = if file_backed {
            Arc::clone(&source) as DiskBackendHandle
        } else {
            Arc::new(InMemoryDiskBackend::new())
        };
        let controller =
            BoxController::new(&config, nd, backend)?.with_next_id(table.header.next_id);

        let mut resident = 0;
        let mut boxes = Vec::with_capacity(table.boxes.len());
        for saved in table.boxes {
            let totals = BoxTotals {
                signal: saved.signal,
                error_squared: saved.error_squared,
                n_points: saved.n_points,
            };
            let state = match (&saved.content, saved.content.block()) {
                (BoxContent::Children(children), _) => BoxState::Grid(children.clone()),
                (_, None) => BoxState::Leaf(EventBuffer::Resident(Vec::new())),
                (BoxContent::Events { count, .. }, Some(block)) if file_backed => {
                    BoxState::Leaf(EventBuffer::OnDisk { block, count: *count })
                }
                (BoxContent::Events { count, .. }, Some(block)) => {
                    let events = read_saved_block(&source, block, *count, nd)?;
                    let actual = BoxTotals::of_events(&events);
                    if !sums_match(actual.signal, totals.signal)
                        || !sums_match(actual.error_squared, totals.error_squared)
                    {
                        return Err(MdStoreError::CorruptData(format!(
                            "leaf {} totals differ from its stored events",
                            saved.id
                        )));
                    }
                    resident += events.len();
                    BoxState::Leaf(EventBuffer::Resident(events))
                }
            };
            boxes.push(MdBox::restored(
                saved.id,
                saved.depth,
                saved.parent,
                saved.extents,
                config.max_depth,
                totals,
                state,
            ));
        }
        controller.residency().add_resident(resident);

        let workspace = Self {
            extents: Extents::from_dimensions(&table.header.dimensions),
            dimensions: table.header.dimensions,
            config,
            controller,
            arena: BoxArena::from_boxes(boxes)?,
            source: file_backed.then(|| path.to_path_buf()),
            rejected: AtomicU64::new(0),
        };
        log::info!(
            "loaded {} boxes and {} events from '{}' ({})",
            workspace.arena.len(),
            table.header.total_events,
            path.display(),
            if file_backed { "file-backed" } else { "in memory" }
        );
        workspace.enforce_residency()?;
        Ok(workspace)
    }
}

fn check_dimensionality(nd: usize) -> Result<(), MdStoreError> {
    if nd == 0 || nd > MAX_DIMENSIONS {
        return Err(MdStoreError::Dimensionality { requested: nd, max: MAX_DIMENSIONS });
    }
    Ok(())
}

/// Writes one leaf's events to the snapshot and returns its table entry and totals.
fn write_leaf(
    writer: &SnapshotWriter,
    events: &[Event],
    nd: usize,
) -> Result<(BoxContent, BoxTotals), MdStoreError> {
    let totals = BoxTotals::of_events(events);
    if events.is_empty() {
        return Ok((BoxContent::empty_leaf(), totals));
    }
    let block = writer.write_block(&encode_block(events, nd)?)?;
    Ok((
        BoxContent::Events { offset: block.offset, length: block.length, count: events.len() },
        totals,
    ))
}

/// Reads a block straight from the snapshot during an eager load.
fn read_saved_block(
    source: &FileDiskBackend,
    block: DiskBlock,
    count: usize,
    nd: usize,
) -> Result<Vec<Event>, MdStoreError> {
    let events = decode_block(&source.read(block.offset, block.length)?, nd)?;
    if events.len() != count {
        return Err(MdStoreError::CorruptData(format!(
            "block at {} holds {} events, expected {}",
            block.offset,
            events.len(),
            count
        )));
    }
    Ok(events)
}
