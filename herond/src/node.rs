//! The node: per-peer message loops wired to the chain and mempool.
//!
//! One tokio task per peer drives the framed codec; inventory and header
//! messages turn into chain requests, bodies are handed to the chain or
//! mempool, and accepted items are announced back out over a broadcast
//! channel every peer task listens on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use heron_chain::block::{self, Block, Height};
use heron_chain::bloom::BloomFilter;
use heron_chain::transaction::Transaction;
use heron_consensus::{BlockOutcome, Chain, ChainError};
use heron_mempool::{Added, HashStatus, Mempool};
use heron_network::constants::{
    BLOCK_STALL_TIMEOUT, CURRENT_VERSION, MAX_BLOCK_REQUESTS, PENDING_BLOCK_BYTE_BUDGET,
    USER_AGENT,
};
use heron_network::{
    AddressBook, Codec, InventoryHash, Message, Misbehavior, Nonce, Peer, PeerServices,
    PeerState, RequestTable, Version,
};

/// Batch ceiling for a `headers` reply.
const MAX_HEADERS_PER_MESSAGE: usize = 2000;

/// Batch ceiling for an `inv` answering `getblocks`.
const MAX_INV_PER_MESSAGE: usize = 500;

/// The node's service advertisement.
fn our_services() -> PeerServices {
    PeerServices::FULL_NODE | PeerServices::BLOOM | PeerServices::CASH
}

/// Shared node state handed to every peer task.
pub struct Node {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    address_book: Arc<AddressBook>,
    requests: Arc<RequestTable>,
    next_peer_id: AtomicU64,
    stop: Arc<AtomicBool>,
    /// Bytes of downloaded-but-unvalidated blocks; backpressure gate.
    pending_block_bytes: AtomicUsize,
    /// Announcements fanned out to every peer task.
    announcements: broadcast::Sender<Message>,
}

impl Node {
    pub fn new(
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        address_book: Arc<AddressBook>,
        stop: Arc<AtomicBool>,
    ) -> Arc<Node> {
        let (announcements, _) = broadcast::channel(256);
        Arc::new(Node {
            chain,
            mempool,
            address_book,
            requests: Arc::new(RequestTable::new()),
            next_peer_id: AtomicU64::new(1),
            stop,
            pending_block_bytes: AtomicUsize::new(0),
            announcements,
        })
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// Accept inbound connections until shutdown.
    pub async fn listen(self: Arc<Self>, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "listening for peers");
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            let (stream, addr) = listener.accept().await?;
            let node = self.clone();
            tokio::spawn(async move {
                node.run_peer(stream, addr, false).await;
            });
        }
    }

    /// Dial an outbound peer.
    pub async fn connect(self: Arc<Self>, addr: SocketAddr) {
        if !self.address_book.should_dial(&addr) {
            debug!(%addr, "skipping poorly scored peer");
            return;
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => self.run_peer(stream, addr, true).await,
            Err(error) => debug!(%addr, %error, "dial failed"),
        }
    }

    /// Drive one peer connection to completion.
    async fn run_peer(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, outbound: bool) {
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let codec = Codec::builder()
            .for_network(self.chain.network())
            .with_metrics_label(addr.to_string())
            .finish();
        let mut framed = Framed::new(stream, codec);
        let mut peer = Peer::new(peer_id, addr);
        let mut announcements = self.announcements.subscribe();
        let mut liveness = tokio::time::interval(Duration::from_secs(5));

        if outbound {
            let version = self.version_message(addr);
            if framed.send(Message::Version(version)).await.is_err() {
                return;
            }
            peer.version_sent();
        }

        let misbehavior: Option<Misbehavior> = loop {
            if self.stop.load(Ordering::Relaxed) {
                break None;
            }
            tokio::select! {
                frame = framed.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(error)) => {
                            debug!(peer = peer_id, %error, "malformed message");
                            break Some(Misbehavior::Malformed);
                        }
                        None => break None,
                    };
                    if let Err(misbehavior) = peer.record_message(Instant::now()) {
                        break Some(misbehavior);
                    }
                    match self.handle_message(&mut peer, message, outbound).await {
                        Ok(responses) => {
                            for response in responses {
                                if framed.send(response).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(misbehavior) => break Some(misbehavior),
                    }
                    if peer.state() == PeerState::Closing {
                        break None;
                    }
                }
                announcement = announcements.recv() => {
                    if let Ok(message) = announcement {
                        if let Some(message) = filter_announcement(&mut peer, message) {
                            if framed.send(message).await.is_err() {
                                break None;
                            }
                        }
                    }
                }
                _ = liveness.tick() => {
                    if let Err(misbehavior) =
                        peer.check_liveness(Instant::now(), BLOCK_STALL_TIMEOUT)
                    {
                        break Some(misbehavior);
                    }
                }
            }
        };

        if let Some(misbehavior) = misbehavior {
            warn!(peer = peer_id, %addr, ?misbehavior, "disconnecting peer");
            self.address_book.adjust_score(addr, -misbehavior.penalty());
        }
        peer.close();
        self.requests.release_peer(peer_id);
        self.mempool.release_node(peer_id);
        debug!(peer = peer_id, %addr, "peer disconnected");
    }

    fn version_message(&self, their_addr: SocketAddr) -> Version {
        Version::new(
            CURRENT_VERSION,
            their_addr,
            PeerServices::FULL_NODE,
            our_services(),
            ([0, 0, 0, 0], 0).into(),
            Nonce::default(),
            USER_AGENT.to_string(),
            self.chain.tip().0,
            true,
        )
    }

    /// Handle one inbound message; returns the responses to send.
    async fn handle_message(
        &self,
        peer: &mut Peer,
        message: Message,
        outbound: bool,
    ) -> Result<Vec<Message>, Misbehavior> {
        trace!(peer = peer.id, %message, "handling message");
        let mut responses = Vec::new();

        match message {
            Message::Version(version) => {
                self.address_book
                    .saw(peer.addr, version.services, &version.user_agent);
                peer.version_received(version);
                if !outbound {
                    responses.push(Message::Version(self.version_message(peer.addr)));
                    peer.version_sent();
                }
                responses.push(Message::Verack);
                // Start the liveness proof immediately.
                let nonce = Nonce::default();
                peer.ping_sent(nonce, Instant::now());
                responses.push(Message::Ping(nonce));
            }
            Message::Verack => {
                peer.verack_received();
            }
            Message::Ping(nonce) => {
                responses.push(Message::Pong(nonce));
            }
            Message::Pong(nonce) => {
                peer.pong_received(nonce, Instant::now());
            }

            Message::Inv(items) => {
                responses.extend(self.handle_inv(peer, items)?);
            }
            Message::Headers(headers) => {
                let batch: Vec<_> = headers.iter().map(|counted| counted.header).collect();
                match self.chain.add_headers(&batch) {
                    Ok(outcome) => {
                        if outcome.accepted > 0 {
                            // Progress: immediately ask for the next batch
                            // and schedule bodies.
                            responses.push(self.next_headers_request());
                            responses.extend(self.schedule_block_requests(peer));
                        } else if outcome.orphaned > 0 {
                            responses.push(self.next_headers_request());
                        }
                    }
                    Err(error) => return Err(self.chain_penalty(peer, error)),
                }
            }
            Message::Block(blk) => {
                responses.extend(self.handle_block(peer, blk)?);
            }
            Message::Tx(tx) => {
                responses.extend(self.handle_transaction(peer, tx)?);
            }
            Message::GetData(items) => {
                responses.extend(self.serve_getdata(peer, items));
            }
            Message::NotFound(items) => {
                for item in items {
                    self.requests.release(&item);
                }
            }
            Message::GetHeaders(request) => {
                responses.push(self.serve_headers(request.block_locator_hashes, request.stop_hash));
            }
            Message::GetBlocks(request) => {
                responses.push(
                    self.serve_block_inventory(request.block_locator_hashes, request.stop_hash),
                );
            }
            Message::Mempool => {
                let ids = self.mempool.ready_ids();
                self.mempool.lock_for_node(peer.id, &ids);
                let mut inventory = Vec::new();
                for id in ids {
                    let matches = if peer.filter.is_empty() {
                        true
                    } else {
                        match self.mempool.get(&id) {
                            Some(tx) => peer.filter.matches_transaction(&tx),
                            None => false,
                        }
                    };
                    if matches {
                        inventory.push(InventoryHash::Tx(id));
                    }
                }
                self.mempool.release_node(peer.id);
                responses.push(Message::Inv(inventory));
            }

            Message::FilterLoad {
                filter,
                hash_functions_count,
                tweak,
                flags,
            } => match BloomFilter::from_wire(filter, hash_functions_count, tweak.0, flags) {
                Ok(filter) => peer.filter = filter,
                Err(_) => return Err(Misbehavior::Malformed),
            },
            Message::FilterAdd { data } => {
                if data.len() > 520 {
                    return Err(Misbehavior::Malformed);
                }
                peer.filter.insert(&data);
            }
            Message::FilterClear => {
                peer.filter = BloomFilter::empty();
            }

            Message::GetAddr => {
                let candidates = self.address_book.dial_candidates(100);
                let now = chrono::Utc::now();
                let addrs = candidates
                    .into_iter()
                    .map(|addr| heron_network::MetaAddr {
                        last_seen: now,
                        services: PeerServices::FULL_NODE,
                        addr,
                    })
                    .collect();
                responses.push(Message::Addr(addrs));
            }
            Message::Addr(addrs) => {
                for meta in addrs.into_iter().take(1000) {
                    self.address_book
                        .saw(meta.addr, meta.services, "");
                }
            }

            Message::CompactBlock(compact) => {
                // Treat as a header announcement; fetch the full block.
                let hash = compact.header.hash();
                if !self.chain.contains_header(&hash) && !self.chain.is_blacklisted(&hash) {
                    match self.chain.add_headers(&[compact.header]) {
                        Ok(_) => responses.extend(self.schedule_block_requests(peer)),
                        Err(error) => return Err(self.chain_penalty(peer, error)),
                    }
                }
            }
            Message::GetBlockTxn(request) => {
                // Serve from the stored block if we have it.
                if let Some(height) = self.chain.store().height_of(&request.block_hash) {
                    if let Ok(block) = self.chain.store().block_at(height) {
                        let transactions = request
                            .indexes
                            .iter()
                            .filter_map(|index| {
                                block.transactions.get(*index as usize).cloned()
                            })
                            .collect();
                        responses.push(Message::BlockTxn(heron_network::protocol::external::BlockTxn {
                            block_hash: request.block_hash,
                            transactions,
                        }));
                    }
                }
            }

            // Peer preferences and information we note but do not act on.
            Message::BlockTxn(_)
            | Message::MerkleBlock(_)
            | Message::SendCompact(_)
            | Message::FeeFilter(_)
            | Message::SendHeaders
            | Message::Reject { .. } => {}
        }

        Ok(responses)
    }

    /// Classify an `inv`: unknown blocks turn into header requests,
    /// unknown transactions into body requests.
    fn handle_inv(
        &self,
        peer: &mut Peer,
        items: Vec<InventoryHash>,
    ) -> Result<Vec<Message>, Misbehavior> {
        let mut responses = Vec::new();
        let mut wanted = Vec::new();

        for item in items {
            match item {
                InventoryHash::Block(hash) | InventoryHash::FilteredBlock(hash)
                | InventoryHash::CompactBlock(hash) => {
                    if self.chain.is_blacklisted(&hash) {
                        return Err(Misbehavior::InvalidAnnouncement);
                    }
                    if !self.chain.contains_header(&hash) {
                        responses.push(self.next_headers_request());
                    }
                }
                InventoryHash::Tx(hash) => {
                    if self.mempool.hash_status(self.chain.utxo(), &hash) == HashStatus::Unknown
                        && self.mempool.note_requested(hash)
                        && self
                            .requests
                            .try_reserve(InventoryHash::Tx(hash), peer.id, Instant::now())
                    {
                        wanted.push(InventoryHash::Tx(hash));
                    }
                }
                InventoryHash::Error => {}
            }
        }

        if !wanted.is_empty() {
            responses.push(Message::GetData(wanted));
        }
        responses.dedup();
        Ok(responses)
    }

    /// Issue block body requests for accepted headers, within the byte
    /// budget and the global in-flight bound.
    fn schedule_block_requests(&self, peer: &mut Peer) -> Vec<Message> {
        if self.pending_block_bytes.load(Ordering::Relaxed) > PENDING_BLOCK_BYTE_BUDGET {
            return Vec::new();
        }
        let now = Instant::now();
        let mut wanted = Vec::new();
        for hash in self.chain.needed_blocks(MAX_BLOCK_REQUESTS) {
            if !self.requests.can_request_block(now) {
                break;
            }
            if self
                .requests
                .try_reserve(InventoryHash::Block(hash), peer.id, now)
            {
                wanted.push(InventoryHash::Block(hash));
            }
        }
        if wanted.is_empty() {
            Vec::new()
        } else {
            peer.block_request_started(now);
            vec![Message::GetData(wanted)]
        }
    }

    fn next_headers_request(&self) -> Message {
        Message::GetHeaders(heron_network::protocol::external::GetHeaders {
            block_locator_hashes: self.chain.locator(),
            stop_hash: None,
        })
    }

    /// A block body arrived.
    fn handle_block(
        &self,
        peer: &mut Peer,
        block: Arc<Block>,
    ) -> Result<Vec<Message>, Misbehavior> {
        let hash = block.hash();
        let size = block.serialized_size();
        self.requests.release(&InventoryHash::Block(hash));
        peer.block_request_finished();
        self.pending_block_bytes.fetch_add(size, Ordering::Relaxed);

        let outcome = self.chain.add_block(block.clone());
        self.pending_block_bytes.fetch_sub(size, Ordering::Relaxed);

        let mut responses = Vec::new();
        match outcome {
            Ok(BlockOutcome::Committed { height, .. }) => {
                self.apply_block_to_mempool(&block);
                info!(height = height.0, %hash, "accepted block");
                let _ = self
                    .announcements
                    .send(Message::Inv(vec![InventoryHash::Block(hash)]));
                responses.extend(self.schedule_block_requests(peer));
            }
            Ok(BlockOutcome::Reorged {
                fork_height,
                old_tip,
                new_tip,
                returned_transactions,
            }) => {
                info!(
                    fork = fork_height.0,
                    old = old_tip.0,
                    new = new_tip.0,
                    "chain reorganized"
                );
                self.apply_block_to_mempool(&block);
                // Transactions from the abandoned branch go back through
                // admission; the invalid ones simply fail.
                let forks = self.chain.fork_set(Height(new_tip.0 + 1));
                for tx in returned_transactions {
                    let _ = self
                        .mempool
                        .add(tx, self.chain.utxo(), &forks, new_tip);
                }
                let _ = self
                    .announcements
                    .send(Message::Inv(vec![InventoryHash::Block(hash)]));
            }
            Ok(BlockOutcome::Stored) | Ok(BlockOutcome::AlreadyKnown) => {}
            Err(ChainError::OrphanHeader) => {
                // Not an offense; we are missing its ancestry.
                responses.push(self.next_headers_request());
            }
            Err(error) => return Err(self.chain_penalty(peer, error)),
        }
        Ok(responses)
    }

    /// Drop confirmed and conflicted transactions from the pool after a
    /// block lands.
    fn apply_block_to_mempool(&self, block: &Block) {
        let ids: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
        let removed = self.mempool.pull(&ids);
        if !removed.is_empty() {
            debug!(count = removed.len(), "pulled confirmed transactions");
        }
        self.mempool.finalize(self.chain.utxo());
    }

    /// A transaction body arrived.
    fn handle_transaction(
        &self,
        peer: &mut Peer,
        tx: Arc<Transaction>,
    ) -> Result<Vec<Message>, Misbehavior> {
        let txid = tx.hash();
        self.requests.release(&InventoryHash::Tx(txid));

        let (tip, _) = self.chain.tip();
        let forks = self.chain.fork_set(Height(tip.0 + 1));
        match self.mempool.add(tx, self.chain.utxo(), &forks, tip) {
            Ok(Added::Ready) => {
                let _ = self
                    .announcements
                    .send(Message::Inv(vec![InventoryHash::Tx(txid)]));
                Ok(Vec::new())
            }
            Ok(Added::Pending) => Ok(Vec::new()),
            // Policy rejections cost the peer nothing.
            Err(heron_mempool::AddError::LowFee)
            | Err(heron_mempool::AddError::NonStandard)
            | Err(heron_mempool::AddError::DoubleSpend(_))
            | Err(heron_mempool::AddError::AlreadyHave)
            | Err(heron_mempool::AddError::Validating)
            | Err(heron_mempool::AddError::KnownInvalid) => Ok(Vec::new()),
            Err(heron_mempool::AddError::Invalid(error)) => {
                debug!(peer = peer.id, %txid, %error, "peer sent an invalid transaction");
                Err(Misbehavior::InvalidAnnouncement)
            }
        }
    }

    /// Serve a `getdata`: blocks and headers from the store, transactions
    /// from the pool, `notfound` for the rest.
    fn serve_getdata(&self, peer: &mut Peer, items: Vec<InventoryHash>) -> Vec<Message> {
        let mut responses = Vec::new();
        let mut missing = Vec::new();

        for item in items {
            match item {
                InventoryHash::Block(hash) => {
                    match self
                        .chain
                        .store()
                        .height_of(&hash)
                        .and_then(|height| self.chain.store().block_at(height).ok())
                    {
                        Some(block) => responses.push(Message::Block(Arc::new(block))),
                        None => missing.push(item),
                    }
                }
                InventoryHash::FilteredBlock(hash) => match self.serve_merkle_block(peer, &hash) {
                    Some(mut messages) => responses.append(&mut messages),
                    None => missing.push(item),
                },
                InventoryHash::Tx(hash) => match self.mempool.get(&hash) {
                    Some(tx) => {
                        self.mempool.lock_for_node(peer.id, &[hash]);
                        responses.push(Message::Tx(tx));
                        self.mempool.release_node(peer.id);
                    }
                    None => missing.push(item),
                },
                InventoryHash::CompactBlock(_) | InventoryHash::Error => missing.push(item),
            }
        }

        if !missing.is_empty() {
            responses.push(Message::NotFound(missing));
        }
        responses
    }

    /// Build a `merkleblock` plus the matching `tx` messages for a
    /// filtered-block request.
    fn serve_merkle_block(
        &self,
        peer: &mut Peer,
        hash: &block::Hash,
    ) -> Option<Vec<Message>> {
        let height = self.chain.store().height_of(hash)?;
        let block = self.chain.store().block_at(height).ok()?;

        let tx_hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
        let matches: Vec<bool> = block
            .transactions
            .iter()
            .map(|tx| peer.filter.matches_transaction(tx))
            .collect();

        let proof =
            heron_chain::block::merkle::PartialMerkleTree::build(&tx_hashes, &matches);
        let mut messages = vec![Message::MerkleBlock(
            heron_network::protocol::external::MerkleBlock {
                header: block.header,
                proof,
            },
        )];
        for (tx, matched) in block.transactions.iter().zip(matches.iter()) {
            if *matched {
                messages.push(Message::Tx(tx.clone()));
            }
        }
        Some(messages)
    }

    /// Answer `getheaders` with the batch following the best locator
    /// match.
    fn serve_headers(
        &self,
        locator: Vec<block::Hash>,
        stop_hash: Option<block::Hash>,
    ) -> Message {
        let start = self.locator_fork_point(&locator);
        let (tip, _) = self.chain.tip();

        let mut headers = Vec::new();
        for height in (start.0 + 1)..=tip.0 {
            if headers.len() >= MAX_HEADERS_PER_MESSAGE {
                break;
            }
            let header = match self.chain.store().header_at(Height(height)) {
                Ok(header) => header,
                Err(_) => break,
            };
            let stop = stop_hash.map(|stop| header.hash() == stop).unwrap_or(false);
            headers.push(heron_chain::block::CountedHeader {
                header,
                transaction_count: 0,
            });
            if stop {
                break;
            }
        }
        Message::Headers(headers)
    }

    /// Answer `getblocks` with an inventory of subsequent block hashes.
    fn serve_block_inventory(
        &self,
        locator: Vec<block::Hash>,
        stop_hash: Option<block::Hash>,
    ) -> Message {
        let start = self.locator_fork_point(&locator);
        let (tip, _) = self.chain.tip();

        let mut inventory = Vec::new();
        for height in (start.0 + 1)..=tip.0 {
            if inventory.len() >= MAX_INV_PER_MESSAGE {
                break;
            }
            let hash = match self.chain.store().hash_at(Height(height)) {
                Ok(hash) => hash,
                Err(_) => break,
            };
            inventory.push(InventoryHash::Block(hash));
            if stop_hash == Some(hash) {
                break;
            }
        }
        Message::Inv(inventory)
    }

    /// The highest locator entry on our active chain; genesis if none
    /// match.
    fn locator_fork_point(&self, locator: &[block::Hash]) -> Height {
        for hash in locator {
            if let Some(height) = self.chain.store().height_of(hash) {
                return height;
            }
        }
        Height(0)
    }

    /// Translate a chain rejection into peer punishment.
    fn chain_penalty(&self, peer: &mut Peer, error: ChainError) -> Misbehavior {
        if Chain::is_fatal(&error) {
            // Operator intervention required; stop making progress.
            self.stop.store(true, Ordering::Relaxed);
            warn!(%error, "fatal state error, halting");
            return Misbehavior::Malformed;
        }
        debug!(peer = peer.id, %error, "peer sent invalid chain data");
        Misbehavior::InvalidAnnouncement
    }
}

/// Decide whether an announcement is forwarded to this peer.
fn filter_announcement(peer: &mut Peer, message: Message) -> Option<Message> {
    if !peer.is_ready() {
        return None;
    }
    match &message {
        Message::Inv(items) => {
            let relay = peer
                .version()
                .map(|version| version.relay)
                .unwrap_or(true);
            let filtered: Vec<InventoryHash> = items
                .iter()
                .filter(|item| match item {
                    InventoryHash::Tx(_) => relay,
                    _ => true,
                })
                .copied()
                .collect();
            if filtered.is_empty() {
                None
            } else {
                Some(Message::Inv(filtered))
            }
        }
        _ => Some(message),
    }
}

/// Background maintenance: mempool promotion, expiry, and request table
/// pruning.
pub async fn maintenance_loop(node: Arc<Node>, stop: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let (tip, _) = node.chain.tip();
        let forks = node.chain.fork_set(Height(tip.0 + 1));
        node.mempool
            .promote_pending(node.chain.utxo(), &forks, tip);
        node.mempool.maintain();
    }
}
