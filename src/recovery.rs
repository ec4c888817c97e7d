//! Crash recovery (spec §4.7): analysis, idempotent redo, and undo of
//! transactions that never reached a commit or abort record.
//!
//! Grounded on `small-db`'s `tx_log/log_manager.rs`, which already
//! replays its append-only log on open; generalized here into the
//! three-pass ARIES shape spec §4.7 names (analysis, redo, undo), with
//! idempotent redo keyed off each page's own lsn (so replaying an
//! already-applied record is a no-op) and undo driven by the
//! before-images carried on every record type rather than a separate
//! in-memory undo log, which does not survive a crash: `Put`/`Delete`
//! carry a logical prior value, and `PageImage` (the full-page record a
//! split or merge logs) carries the page's prior bytes, or `None` when
//! the page was freshly allocated by that same mutation.
//!
//! A transaction whose undo is itself interrupted by a second crash is
//! safe to retry. Its logical `Put`/`Delete` compensations are logged
//! as ordinary records under the same transaction id; its `PageImage`
//! compensations write the prior bytes straight back with no new
//! record, which is equally safe to repeat since `redo()` always
//! re-establishes the same as-forward-applied baseline from the
//! unaltered WAL before undo runs again. Either way an abort record is
//! appended only once undo finishes, so a second recovery pass either
//! finds the transaction still a loser (and undoes it again, a
//! harmless no-op) or finds the abort record and leaves it alone.

use std::collections::HashSet;
use std::sync::Arc;

use log::{info, warn};

use crate::btree::node::InternalNode;
use crate::btree::BTree;
use crate::error::Result;
use crate::page::{Page, PageType};
use crate::pager::Pager;
use crate::wal::{RecordPayload, Wal, WalRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryStats {
    pub records_replayed: usize,
    pub pages_redone: usize,
    pub transactions_undone: usize,
}

pub fn recover(pager: &Arc<Pager>, wal: &Arc<Wal>, btree: &Arc<BTree>) -> Result<RecoveryStats> {
    let records = wal.iterate_from(0)?;
    if records.is_empty() {
        return Ok(RecoveryStats::default());
    }
    info!("recovery: analyzing {} wal records", records.len());

    let losers = analyze(&records);
    let pages_redone = redo(pager, btree, &records)?;
    let transactions_undone = undo(pager, wal, btree, &records, &losers)?;

    pager.sync()?;
    wal.flush()?;

    info!(
        "recovery: complete ({} records, {} pages redone, {} transactions undone)",
        records.len(),
        pages_redone,
        transactions_undone
    );
    Ok(RecoveryStats {
        records_replayed: records.len(),
        pages_redone,
        transactions_undone,
    })
}

/// Every transaction that has a `Begin` with no matching `Commit`/`Abort`
/// is a loser and must be undone.
fn analyze(records: &[WalRecord]) -> HashSet<u64> {
    let mut losers = HashSet::new();
    for record in records {
        match record.payload {
            RecordPayload::Begin => {
                losers.insert(record.txn_id);
            }
            RecordPayload::Commit | RecordPayload::Abort => {
                losers.remove(&record.txn_id);
            }
            _ => {}
        }
    }
    losers
}

fn redo(pager: &Arc<Pager>, btree: &Arc<BTree>, records: &[WalRecord]) -> Result<usize> {
    let mut pages_redone = 0;
    for record in records {
        match &record.payload {
            RecordPayload::Put { key, value, .. } => {
                btree.redo_put(record.lsn, key, value)?;
            }
            RecordPayload::Delete { key, .. } => {
                btree.redo_delete(record.lsn, key)?;
            }
            RecordPayload::PageImage { page_id, image, .. } => {
                let current_lsn = pager.read_page(*page_id).ok().map(|p| p.lsn()).unwrap_or(0);
                if current_lsn < record.lsn {
                    let page = Page::decode(image)?;
                    pager.write_page(*page_id, &page)?;
                    pages_redone += 1;
                }
            }
            RecordPayload::Begin
            | RecordPayload::Commit
            | RecordPayload::Abort
            | RecordPayload::CheckpointBegin { .. }
            | RecordPayload::CheckpointEnd => {}
        }
    }
    Ok(pages_redone)
}

fn undo(
    pager: &Arc<Pager>,
    wal: &Arc<Wal>,
    btree: &Arc<BTree>,
    records: &[WalRecord],
    losers: &HashSet<u64>,
) -> Result<usize> {
    for &txn_id in losers {
        let mut own_records: Vec<&WalRecord> = records.iter().filter(|r| r.txn_id == txn_id).collect();
        own_records.sort_by_key(|r| std::cmp::Reverse(r.lsn));

        for record in own_records {
            match &record.payload {
                RecordPayload::Put { key, prior, .. } => match prior {
                    Some(value) => {
                        btree.insert(txn_id, key, value)?;
                    }
                    None => {
                        btree.delete(txn_id, key)?;
                    }
                },
                RecordPayload::Delete { key, prior } => {
                    btree.insert(txn_id, key, prior)?;
                }
                RecordPayload::PageImage { page_id, prior_image, .. } => {
                    undo_page_image(pager, *page_id, prior_image)?;
                }
                _ => {}
            }
        }
        wal.append_abort(txn_id)?;
        warn!("recovery: undid uncommitted transaction {}", txn_id);
    }
    Ok(losers.len())
}

/// Reverse a structural mutation a loser transaction made directly on
/// the page, bypassing the btree's own key-based descent entirely —
/// the record already names the exact page. `prior_image` is the
/// page's bytes from before the mutation; `None` means the mutation
/// allocated `page_id` fresh, so undoing it means freeing it again.
///
/// Applying these bytes is idempotent with no WAL record of its own:
/// `redo()` always re-establishes the as-forward-applied baseline from
/// the (unaltered) WAL before `undo()` runs, so a crash mid-undo and a
/// second recovery pass reach the same state again.
fn undo_page_image(pager: &Arc<Pager>, page_id: crate::page::PageId, prior_image: &Option<Vec<u8>>) -> Result<()> {
    match prior_image {
        Some(bytes) => {
            let page = Page::decode(bytes)?;
            pager.write_page(page_id, &page)?;
        }
        None => {
            // this page was allocated fresh by the loser's split; if it
            // is currently the tree root (an insert that grew the tree
            // by one level), restore the pre-split root before freeing
            // it, or the header would be left pointing at a freed page.
            if pager.root_page() == page_id {
                if let Ok(current) = pager.read_page(page_id) {
                    if current.page_type() == PageType::BTreeInternal {
                        if let Ok(node) = InternalNode::decode(&current) {
                            if let Some(first) = node.entries.first() {
                                pager.set_root_page(first.child)?;
                            }
                        }
                    }
                }
            }
            pager.free_page(page_id)?;
        }
    }
    Ok(())
}
