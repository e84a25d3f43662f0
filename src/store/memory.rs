use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::model::*;
use crate::wal::Wal;

use super::*;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are written
/// together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_other(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_other(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes do not leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }

    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_other(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

fn journal_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Journal(e.to_string())
}

/// In-memory implementation of every repository, journaled to a WAL.
///
/// State lives in `DashMap`s; a write reaches memory only after its event is
/// durable in the WAL.
pub struct MemoryStore {
    categories: DashMap<String, (u64, Category)>,
    resources: DashMap<ResourceId, Resource>,
    resource_names: DashMap<String, ResourceId>,
    visitors: DashMap<String, Visitor>,
    external_ids: DashMap<i64, String>,
    bookings: DashMap<BookingId, Booking>,
    closed: DashMap<BookingId, ClosedBooking>,
    category_seq: AtomicU64,
    next_resource_id: AtomicU64,
    next_booking_id: AtomicU64,
    /// Serialises uniqueness-checked writes (categories, resources, visitors).
    catalog: Mutex<()>,
    /// Appends hold it shared; compaction holds it exclusively so the snapshot
    /// cannot miss a concurrent append.
    gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl MemoryStore {
    /// Replay the WAL at `wal_path` and start its writer task. Needs a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            categories: DashMap::new(),
            resources: DashMap::new(),
            resource_names: DashMap::new(),
            visitors: DashMap::new(),
            external_ids: DashMap::new(),
            bookings: DashMap::new(),
            closed: DashMap::new(),
            category_seq: AtomicU64::new(0),
            next_resource_id: AtomicU64::new(1),
            next_booking_id: AtomicU64::new(1),
            catalog: Mutex::new(()),
            gate: RwLock::new(()),
            wal_tx,
        };
        for event in &events {
            store.apply(event);
        }
        tracing::info!(
            "store replayed {} events from {}: {} resources, {} bookings",
            events.len(),
            wal_path.display(),
            store.resources.len(),
            store.bookings.len()
        );
        Ok(store)
    }

    /// Apply an event to memory. Ids seen here push the id counters forward.
    fn apply(&self, event: &Event) {
        match event {
            Event::CategoryCreated { category } => {
                let seq = self.category_seq.fetch_add(1, Ordering::SeqCst);
                self.categories.insert(category.name.clone(), (seq, category.clone()));
            }
            Event::ResourceCreated { resource } => {
                self.next_resource_id.fetch_max(resource.id + 1, Ordering::SeqCst);
                self.resource_names.insert(resource.name.clone(), resource.id);
                self.resources.insert(resource.id, resource.clone());
            }
            Event::VisitorSaved { visitor } => {
                if let Some(previous) = self.visitors.get(&visitor.email).map(|v| v.external_id)
                    && let Some(old_ext) = previous
                    && Some(old_ext) != visitor.external_id
                {
                    self.external_ids.remove(&old_ext);
                }
                if let Some(ext) = visitor.external_id {
                    self.external_ids.insert(ext, visitor.email.clone());
                }
                self.visitors.insert(visitor.email.clone(), visitor.clone());
            }
            Event::BookingCreated { booking } => {
                self.next_booking_id.fetch_max(booking.id + 1, Ordering::SeqCst);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingClosed { id, closed } => {
                self.next_booking_id.fetch_max(id + 1, Ordering::SeqCst);
                self.bookings.remove(id);
                self.closed.insert(*id, closed.clone());
            }
            Event::BookingDeleted { id } => {
                self.next_booking_id.fetch_max(id + 1, Ordering::SeqCst);
                self.bookings.remove(id);
            }
            Event::BookingIdsReserved { next } => {
                self.next_booking_id.fetch_max(*next, Ordering::SeqCst);
            }
        }
    }

    async fn wal_append(&self, event: &Event) -> StoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| journal_err("WAL writer shut down"))?;
        rx.await
            .map_err(|_| journal_err("WAL writer dropped response"))?
            .map_err(journal_err)
    }

    async fn persist_and_apply(&self, event: Event) -> StoreResult<()> {
        let _gate = self.gate.read().await;
        self.wal_append(&event).await?;
        self.apply(&event);
        Ok(())
    }

    /// Events that rebuild the current state from nothing.
    fn snapshot(&self) -> Vec<Event> {
        let mut categories: Vec<(u64, Category)> =
            self.categories.iter().map(|e| e.value().clone()).collect();
        categories.sort_by_key(|(seq, _)| *seq);
        let mut resources: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        resources.sort_by_key(|r| r.id);
        let mut visitors: Vec<Visitor> = self.visitors.iter().map(|e| e.value().clone()).collect();
        visitors.sort_by(|a, b| a.email.cmp(&b.email));
        let mut closed: Vec<ClosedBooking> = self.closed.iter().map(|e| e.value().clone()).collect();
        closed.sort_by_key(|c| c.id);

        let mut events = vec![Event::BookingIdsReserved {
            next: self.next_booking_id.load(Ordering::SeqCst),
        }];
        events.extend(categories.into_iter().map(|(_, category)| Event::CategoryCreated { category }));
        events.extend(resources.into_iter().map(|resource| Event::ResourceCreated { resource }));
        events.extend(visitors.into_iter().map(|visitor| Event::VisitorSaved { visitor }));
        events.extend(closed.into_iter().map(|closed| Event::BookingClosed { id: closed.id, closed }));
        events.extend(
            sorted_by_id(self.bookings.iter().map(|e| e.value().clone()))
                .into_iter()
                .map(|booking| Event::BookingCreated { booking }),
        );
        events
    }

    /// Rewrite the WAL with only the events needed for the current state.
    pub async fn compact(&self) -> StoreResult<()> {
        let _gate = self.gate.write().await;
        let events = self.snapshot();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| journal_err("WAL writer shut down"))?;
        rx.await
            .map_err(|_| journal_err("WAL writer dropped response"))?
            .map_err(journal_err)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    fn bookings_where(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }
}

fn sorted_by_id(bookings: impl Iterator<Item = Booking>) -> Vec<Booking> {
    let mut v: Vec<Booking> = bookings.collect();
    v.sort_by_key(|b| b.id);
    v
}

fn sorted_by_take_date(mut v: Vec<Booking>) -> Vec<Booking> {
    v.sort_by(|a, b| a.take_date.cmp(&b.take_date).then(a.id.cmp(&b.id)));
    v
}

#[async_trait]
impl CategoryRepository for MemoryStore {
    async fn get(&self, name: &str) -> StoreResult<Option<Category>> {
        Ok(self.categories.get(name).map(|e| e.value().1.clone()))
    }

    async fn add(&self, category: Category) -> StoreResult<()> {
        let _catalog = self.catalog.lock().await;
        if self.categories.contains_key(&category.name) {
            return Err(StoreError::Duplicate(category.name));
        }
        self.persist_and_apply(Event::CategoryCreated { category }).await
    }

    async fn list(&self) -> StoreResult<Vec<Category>> {
        let mut v: Vec<(u64, Category)> = self.categories.iter().map(|e| e.value().clone()).collect();
        v.sort_by_key(|(seq, _)| *seq);
        Ok(v.into_iter().map(|(_, c)| c).collect())
    }
}

#[async_trait]
impl ResourceRepository for MemoryStore {
    async fn get(&self, name: &str) -> StoreResult<Option<Resource>> {
        let Some(id) = self.resource_names.get(name).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.resources.get(&id).map(|e| e.value().clone()))
    }

    async fn get_by_id(&self, id: ResourceId) -> StoreResult<Option<Resource>> {
        Ok(self.resources.get(&id).map(|e| e.value().clone()))
    }

    async fn add(&self, resource: NewResource, at: Ts) -> StoreResult<Resource> {
        let _catalog = self.catalog.lock().await;
        if self.resource_names.contains_key(&resource.name) {
            return Err(StoreError::Duplicate(resource.name));
        }
        let resource = Resource {
            id: self.next_resource_id.load(Ordering::SeqCst),
            name: resource.name,
            category: resource.category,
            external_id: resource.external_id,
            comment: resource.comment,
            address: resource.address,
            created_at: at,
            updated_at: at,
        };
        self.persist_and_apply(Event::ResourceCreated {
            resource: resource.clone(),
        })
        .await?;
        Ok(resource)
    }

    async fn list(&self) -> StoreResult<Vec<Resource>> {
        let mut v: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        v.sort_by_key(|r| r.id);
        Ok(v)
    }

    async fn list_in_category(&self, category: &str) -> StoreResult<Vec<Resource>> {
        let mut v: Vec<Resource> = self
            .resources
            .iter()
            .filter(|e| e.value().category == category)
            .map(|e| e.value().clone())
            .collect();
        v.sort_by_key(|r| r.id);
        Ok(v)
    }
}

#[async_trait]
impl VisitorRepository for MemoryStore {
    async fn get(&self, email: &str) -> StoreResult<Option<Visitor>> {
        Ok(self.visitors.get(email).map(|e| e.value().clone()))
    }

    async fn get_by_external_id(&self, external_id: i64) -> StoreResult<Option<Visitor>> {
        let Some(email) = self.external_ids.get(&external_id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        Ok(self.visitors.get(&email).map(|e| e.value().clone()))
    }

    async fn save(&self, visitor: Visitor) -> StoreResult<()> {
        let _catalog = self.catalog.lock().await;
        if let Some(ext) = visitor.external_id
            && let Some(owner) = self.external_ids.get(&ext)
            && *owner.value() != visitor.email
        {
            return Err(StoreError::Duplicate(format!("external id {ext}")));
        }
        self.persist_and_apply(Event::VisitorSaved { visitor }).await
    }

    async fn list(&self) -> StoreResult<Vec<Visitor>> {
        let mut v: Vec<Visitor> = self.visitors.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(v)
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn get(&self, id: BookingId) -> StoreResult<Option<Booking>> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn add(&self, booking: NewBooking) -> StoreResult<Booking> {
        let booking = Booking {
            id: self.next_booking_id.fetch_add(1, Ordering::SeqCst),
            resource_name: booking.resource_name,
            email: booking.email,
            take_date: booking.span.start,
            return_date: booking.span.end,
            created_at: booking.created_at,
        };
        self.persist_and_apply(Event::BookingCreated {
            booking: booking.clone(),
        })
        .await?;
        Ok(booking)
    }

    async fn list(&self) -> StoreResult<Vec<Booking>> {
        Ok(sorted_by_id(self.bookings.iter().map(|e| e.value().clone())))
    }

    async fn list_for_resource(&self, resource_name: &str) -> StoreResult<Vec<Booking>> {
        Ok(sorted_by_id(
            self.bookings_where(|b| b.resource_name == resource_name).into_iter(),
        ))
    }

    async fn list_future_for_resource(&self, resource_name: &str, after: Ts) -> StoreResult<Vec<Booking>> {
        Ok(sorted_by_take_date(
            self.bookings_where(|b| b.resource_name == resource_name && b.take_date > after),
        ))
    }

    async fn list_future_for_visitor(&self, email: &str, after: Ts) -> StoreResult<Vec<Booking>> {
        Ok(sorted_by_take_date(
            self.bookings_where(|b| b.email == email && b.take_date > after),
        ))
    }

    async fn list_returning_between(&self, from: Option<Ts>, to: Ts) -> StoreResult<Vec<Booking>> {
        Ok(sorted_by_id(
            self.bookings_where(|b| from.is_none_or(|f| b.return_date > f) && b.return_date <= to)
                .into_iter(),
        ))
    }

    async fn close(&self, id: BookingId, at: Ts) -> StoreResult<Option<ClosedBooking>> {
        let Some(booking) = self.bookings.get(&id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let closed = booking.close(at);
        self.persist_and_apply(Event::BookingClosed {
            id,
            closed: closed.clone(),
        })
        .await?;
        Ok(Some(closed))
    }

    async fn delete(&self, id: BookingId) -> StoreResult<Option<Booking>> {
        let Some(booking) = self.bookings.get(&id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        self.persist_and_apply(Event::BookingDeleted { id }).await?;
        Ok(Some(booking))
    }
}

#[async_trait]
impl ClosedBookingRepository for MemoryStore {
    async fn get(&self, id: BookingId) -> StoreResult<Option<ClosedBooking>> {
        Ok(self.closed.get(&id).map(|e| e.value().clone()))
    }

    async fn list_for_visitor(&self, email: &str) -> StoreResult<Vec<ClosedBooking>> {
        let mut v: Vec<ClosedBooking> = self
            .closed
            .iter()
            .filter(|e| e.value().email == email)
            .map(|e| e.value().clone())
            .collect();
        v.sort_by_key(|c| c.id);
        Ok(v)
    }

    async fn list_for_resource(&self, resource_name: &str) -> StoreResult<Vec<ClosedBooking>> {
        let mut v: Vec<ClosedBooking> = self
            .closed
            .iter()
            .filter(|e| e.value().resource_name == resource_name)
            .map(|e| e.value().clone())
            .collect();
        v.sort_by_key(|c| c.id);
        Ok(v)
    }
}
