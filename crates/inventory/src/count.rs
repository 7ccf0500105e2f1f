//! Physical inventory (stock count) and adjustment workflow (aggregate).
//!
//! DRAFT → OPEN → COUNTING → VALIDATING → CLOSED; CANCELLED from any state
//! before CLOSED. Every non-zero variance becomes an [`Adjustment`] that is
//! applied through the ledger or explicitly waived before the count closes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    AdjustmentId, Aggregate, AggregateRoot, ArticleId, DepotId, DomainError, Entity, InventoryId,
    LocationId, LotId, StockKey, UserId, checked_value, internal,
};
use stockledger_events::Event;

use crate::movement::MovementNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    Draft,
    Open,
    Counting,
    Validating,
    Closed,
    Cancelled,
}

impl InventoryStatus {
    /// Transition table.
    pub fn can_transition_to(self, next: InventoryStatus) -> bool {
        use InventoryStatus::*;
        matches!(
            (self, next),
            (Draft, Open)
                | (Open, Counting)
                | (Open | Counting, Validating)
                | (Open | Counting | Validating, Closed)
                | (Draft | Open | Counting | Validating, Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "articles")]
pub enum InventoryType {
    /// Every stock key of the depot.
    Full,
    /// Only the listed articles.
    Partial(Vec<ArticleId>),
}

impl InventoryType {
    pub fn covers(&self, article: ArticleId) -> bool {
        match self {
            InventoryType::Full => true,
            InventoryType::Partial(articles) => articles.contains(&article),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountPass {
    First,
    Second,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLine {
    pub line_no: u32,
    pub article: ArticleId,
    pub location: LocationId,
    pub lot: Option<LotId>,
    /// Snapshot of physical stock when the inventory opened.
    pub theoretical_qty: Decimal,
    pub counted_qty_1: Option<Decimal>,
    pub counted_qty_2: Option<Decimal>,
    pub counter_1: Option<UserId>,
    pub counter_2: Option<UserId>,
    pub retained_qty: Option<Decimal>,
    pub variance_qty: Decimal,
    pub variance_value: Decimal,
    pub unit_cost: Decimal,
}

impl InventoryLine {
    fn new(line_no: u32, article: ArticleId, location: LocationId, lot: Option<LotId>, theoretical: Decimal, unit_cost: Decimal) -> Self {
        Self {
            line_no,
            article,
            location,
            lot,
            theoretical_qty: theoretical,
            counted_qty_1: None,
            counted_qty_2: None,
            counter_1: None,
            counter_2: None,
            retained_qty: None,
            variance_qty: Decimal::ZERO,
            variance_value: Decimal::ZERO,
            unit_cost,
        }
    }

    /// Retained = second count if present, else first; variance against the snapshot.
    fn recompute(&mut self, unit_cost: Decimal) {
        self.unit_cost = unit_cost;
        self.retained_qty = self.counted_qty_2.or(self.counted_qty_1);
        self.variance_qty = self
            .retained_qty
            .map(|r| r - self.theoretical_qty)
            .unwrap_or(Decimal::ZERO);
        self.variance_value = internal(self.variance_qty * unit_cost);
    }

    pub fn is_counted(&self) -> bool {
        self.counted_qty_1.is_some()
    }

    pub fn counters(&self) -> impl Iterator<Item = UserId> + '_ {
        self.counter_1.into_iter().chain(self.counter_2)
    }

    pub fn key(&self, depot: DepotId) -> StockKey {
        StockKey::new(self.article, depot, self.location, self.lot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    /// Awaiting application (EN_ATTENTE).
    Pending,
    /// Posted through the ledger (APPLIQUE).
    Applied,
    Waived,
    /// Dropped by a cancelled inventory.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    /// Approved by the inventory validator.
    Standard,
    /// |variance value| above the threshold: needs an explicit chef-level approval.
    Senior,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub inventory: InventoryId,
    pub line_no: u32,
    pub key: StockKey,
    pub qty_before: Decimal,
    pub qty_after: Decimal,
    pub variance: Decimal,
    pub unit_cost: Decimal,
    pub value: Decimal,
    pub motif: String,
    pub requester: UserId,
    pub approver: Option<UserId>,
    pub approval_level: ApprovalLevel,
    pub status: AdjustmentStatus,
    pub movement: Option<MovementNumber>,
    pub waive_reason: Option<String>,
}

impl Entity for Adjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &AdjustmentId {
        &self.id
    }

    fn entity_name() -> &'static str {
        "adjustment"
    }
}

impl Adjustment {
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, AdjustmentStatus::Applied | AdjustmentStatus::Waived)
    }

    /// Pending and approved at the level it needs.
    pub fn is_ready(&self) -> bool {
        self.status == AdjustmentStatus::Pending && self.approver.is_some()
    }
}

/// Theoretical stock captured at open, one per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub article: ArticleId,
    pub location: LocationId,
    pub lot: Option<LotId>,
    pub theoretical_qty: Decimal,
    pub unit_cost: Decimal,
}

/// Aggregate root: InventoryCount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCount {
    id: InventoryId,
    number: String,
    depot: Option<DepotId>,
    inventory_type: InventoryType,
    status: InventoryStatus,
    freeze_requested: bool,
    movements_frozen: bool,
    requester: Option<UserId>,
    validator: Option<UserId>,
    lines: Vec<InventoryLine>,
    adjustments: Vec<Adjustment>,
    version: u64,
    created: bool,
}

impl InventoryCount {
    pub fn empty(id: InventoryId) -> Self {
        Self {
            id,
            number: String::new(),
            depot: None,
            inventory_type: InventoryType::Full,
            status: InventoryStatus::Draft,
            freeze_requested: false,
            movements_frozen: false,
            requester: None,
            validator: None,
            lines: Vec::new(),
            adjustments: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InventoryId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn depot(&self) -> Option<DepotId> {
        self.depot
    }

    pub fn inventory_type(&self) -> &InventoryType {
        &self.inventory_type
    }

    pub fn status(&self) -> InventoryStatus {
        self.status
    }

    pub fn freeze_requested(&self) -> bool {
        self.freeze_requested
    }

    pub fn movements_frozen(&self) -> bool {
        self.movements_frozen
    }

    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    pub fn validator(&self) -> Option<UserId> {
        self.validator
    }

    pub fn lines(&self) -> &[InventoryLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&InventoryLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn adjustments(&self) -> &[Adjustment] {
        &self.adjustments
    }

    pub fn adjustment(&self, id: AdjustmentId) -> Option<&Adjustment> {
        self.adjustments.iter().find(|a| a.id == id)
    }

    /// Sum of |variance value| over all lines, saturating at `Decimal::MAX`.
    pub fn absolute_variance_value(&self) -> Decimal {
        self.lines
            .iter()
            .fold(Decimal::ZERO, |acc, l| acc.saturating_add(l.variance_value.abs()))
    }
}

impl AggregateRoot for InventoryCount {
    type Id = InventoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInventory {
    pub inventory_id: InventoryId,
    pub number: String,
    pub depot: DepotId,
    pub inventory_type: InventoryType,
    pub freeze_movements: bool,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInventory {
    pub snapshot: Vec<SnapshotLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddCountLine, for stock found that was not in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCountLine {
    pub article: ArticleId,
    pub location: LocationId,
    pub lot: Option<LotId>,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCount {
    pub line_no: u32,
    pub counter: UserId,
    pub pass: CountPass,
    pub quantity: Decimal,
    /// Current unit cost of the article, for the variance value.
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateInventory {
    pub approver: UserId,
    /// Adjustments with |variance value| above this need senior approval.
    pub approval_threshold: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveAdjustment {
    pub adjustment_id: AdjustmentId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyAdjustment {
    pub adjustment_id: AdjustmentId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiveAdjustment {
    pub adjustment_id: AdjustmentId,
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInventory {
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCountCommand {
    Create(CreateInventory),
    Open(OpenInventory),
    AddLine(AddCountLine),
    RecordCount(RecordCount),
    Validate(ValidateInventory),
    ApproveAdjustment(ApproveAdjustment),
    ApplyAdjustment(ApplyAdjustment),
    WaiveAdjustment(WaiveAdjustment),
    Cancel(CancelInventory),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCreated {
    pub inventory_id: InventoryId,
    pub number: String,
    pub depot: DepotId,
    pub inventory_type: InventoryType,
    pub freeze_movements: bool,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryOpened {
    pub lines: Vec<InventoryLine>,
    pub movements_frozen: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLineAdded {
    pub line: InventoryLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecorded {
    pub line_no: u32,
    pub counter: UserId,
    pub pass: CountPass,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryValidated {
    pub approver: UserId,
    pub adjustments: Vec<Adjustment>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentApproved {
    pub adjustment_id: AdjustmentId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentApplied. `movement` is filled in by the service after posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentApplied {
    pub adjustment_id: AdjustmentId,
    pub actor: UserId,
    pub movement: Option<MovementNumber>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentWaived {
    pub adjustment_id: AdjustmentId,
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryClosed {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCancelled {
    pub actor: UserId,
    pub reason: String,
    pub discarded: Vec<AdjustmentId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCountEvent {
    InventoryCreated(InventoryCreated),
    InventoryOpened(InventoryOpened),
    CountLineAdded(CountLineAdded),
    CountRecorded(CountRecorded),
    InventoryValidated(InventoryValidated),
    AdjustmentApproved(AdjustmentApproved),
    AdjustmentApplied(AdjustmentApplied),
    AdjustmentWaived(AdjustmentWaived),
    InventoryClosed(InventoryClosed),
    InventoryCancelled(InventoryCancelled),
}

impl InventoryCountEvent {
    /// Attach the ledger posting performed for an applied adjustment.
    pub fn record_posting(&mut self, number: Option<MovementNumber>) {
        if let InventoryCountEvent::AdjustmentApplied(e) = self {
            e.movement = number;
        }
    }

    /// Whether applying this event ends the depot freeze.
    pub fn ends_freeze(&self) -> bool {
        matches!(
            self,
            InventoryCountEvent::InventoryClosed(_) | InventoryCountEvent::InventoryCancelled(_)
        )
    }
}

impl Event for InventoryCountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryCountEvent::InventoryCreated(_) => "stock.inventory.created",
            InventoryCountEvent::InventoryOpened(_) => "stock.inventory.opened",
            InventoryCountEvent::CountLineAdded(_) => "stock.inventory.line_added",
            InventoryCountEvent::CountRecorded(_) => "stock.inventory.count_recorded",
            InventoryCountEvent::InventoryValidated(_) => "stock.inventory.validated",
            InventoryCountEvent::AdjustmentApproved(_) => "stock.adjustment.approved",
            InventoryCountEvent::AdjustmentApplied(_) => "stock.adjustment.applied",
            InventoryCountEvent::AdjustmentWaived(_) => "stock.adjustment.waived",
            InventoryCountEvent::InventoryClosed(_) => "stock.inventory.closed",
            InventoryCountEvent::InventoryCancelled(_) => "stock.inventory.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryCountEvent::InventoryCreated(e) => e.occurred_at,
            InventoryCountEvent::InventoryOpened(e) => e.occurred_at,
            InventoryCountEvent::CountLineAdded(e) => e.occurred_at,
            InventoryCountEvent::CountRecorded(e) => e.occurred_at,
            InventoryCountEvent::InventoryValidated(e) => e.occurred_at,
            InventoryCountEvent::AdjustmentApproved(e) => e.occurred_at,
            InventoryCountEvent::AdjustmentApplied(e) => e.occurred_at,
            InventoryCountEvent::AdjustmentWaived(e) => e.occurred_at,
            InventoryCountEvent::InventoryClosed(e) => e.occurred_at,
            InventoryCountEvent::InventoryCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryCount {
    type Command = InventoryCountCommand;
    type Event = InventoryCountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryCountEvent::InventoryCreated(e) => {
                self.id = e.inventory_id;
                self.number = e.number.clone();
                self.depot = Some(e.depot);
                self.inventory_type = e.inventory_type.clone();
                self.freeze_requested = e.freeze_movements;
                self.requester = Some(e.requester);
                self.status = InventoryStatus::Draft;
                self.created = true;
            }
            InventoryCountEvent::InventoryOpened(e) => {
                self.lines = e.lines.clone();
                self.movements_frozen = e.movements_frozen;
                self.status = InventoryStatus::Open;
            }
            InventoryCountEvent::CountLineAdded(e) => self.lines.push(e.line.clone()),
            InventoryCountEvent::CountRecorded(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    match e.pass {
                        CountPass::First => {
                            line.counted_qty_1 = Some(e.quantity);
                            line.counter_1 = Some(e.counter);
                        }
                        CountPass::Second => {
                            line.counted_qty_2 = Some(e.quantity);
                            line.counter_2 = Some(e.counter);
                        }
                    }
                    line.recompute(e.unit_cost);
                }
                self.status = InventoryStatus::Counting;
            }
            InventoryCountEvent::InventoryValidated(e) => {
                self.validator = Some(e.approver);
                self.adjustments = e.adjustments.clone();
                self.status = InventoryStatus::Validating;
            }
            InventoryCountEvent::AdjustmentApproved(e) => {
                if let Some(adj) = self.adjustments.iter_mut().find(|a| a.id == e.adjustment_id) {
                    adj.approver = Some(e.approver);
                }
            }
            InventoryCountEvent::AdjustmentApplied(e) => {
                if let Some(adj) = self.adjustments.iter_mut().find(|a| a.id == e.adjustment_id) {
                    adj.status = AdjustmentStatus::Applied;
                    adj.movement = e.movement.clone();
                }
            }
            InventoryCountEvent::AdjustmentWaived(e) => {
                if let Some(adj) = self.adjustments.iter_mut().find(|a| a.id == e.adjustment_id) {
                    adj.status = AdjustmentStatus::Waived;
                    adj.waive_reason = Some(e.reason.clone());
                }
            }
            InventoryCountEvent::InventoryClosed(_) => {
                self.movements_frozen = false;
                self.status = InventoryStatus::Closed;
            }
            InventoryCountEvent::InventoryCancelled(e) => {
                for adj in self.adjustments.iter_mut() {
                    if e.discarded.contains(&adj.id) {
                        adj.status = AdjustmentStatus::Discarded;
                    }
                }
                self.movements_frozen = false;
                self.status = InventoryStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCountCommand::Create(cmd) => self.handle_create(cmd),
            InventoryCountCommand::Open(cmd) => self.handle_open(cmd),
            InventoryCountCommand::AddLine(cmd) => self.handle_add_line(cmd),
            InventoryCountCommand::RecordCount(cmd) => self.handle_record(cmd),
            InventoryCountCommand::Validate(cmd) => self.handle_validate(cmd),
            InventoryCountCommand::ApproveAdjustment(cmd) => self.handle_approve(cmd),
            InventoryCountCommand::ApplyAdjustment(cmd) => self.handle_apply(cmd),
            InventoryCountCommand::WaiveAdjustment(cmd) => self.handle_waive(cmd),
            InventoryCountCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl InventoryCount {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("inventory {}", self.id)));
        }
        Ok(())
    }

    fn ensure_transition(&self, next: InventoryStatus, action: &'static str) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::transition("inventory", self.status, action));
        }
        Ok(())
    }

    fn ensure_counting_open(&self, action: &'static str) -> Result<(), DomainError> {
        if !matches!(self.status, InventoryStatus::Open | InventoryStatus::Counting) {
            return Err(DomainError::transition("inventory", self.status, action));
        }
        Ok(())
    }

    /// `approver ∉ {counter_1, counter_2, requester}` for one line.
    fn ensure_independent(&self, approver: UserId, line: &InventoryLine) -> Result<(), DomainError> {
        if line.counters().any(|c| c == approver) {
            return Err(DomainError::segregation(format!(
                "inventory {} line {}: a counter cannot approve their own count",
                self.number, line.line_no
            )));
        }
        if self.requester == Some(approver) {
            return Err(DomainError::segregation(format!(
                "inventory {}: the requester cannot approve its adjustments",
                self.number
            )));
        }
        Ok(())
    }

    fn pending_adjustment(&self, id: AdjustmentId) -> Result<&Adjustment, DomainError> {
        if self.status != InventoryStatus::Validating {
            return Err(DomainError::transition("inventory", self.status, "resolve adjustments of"));
        }
        let adj = self
            .adjustment(id)
            .ok_or_else(|| DomainError::not_found(format!("adjustment {id}")))?;
        if adj.status != AdjustmentStatus::Pending {
            return Err(DomainError::transition(Adjustment::entity_name(), adj.status, "resolve"));
        }
        Ok(adj)
    }

    /// Close once no adjustment is left unresolved (after resolving `resolving`).
    fn closes_after(&self, resolving: AdjustmentId) -> bool {
        self.adjustments
            .iter()
            .all(|a| a.id == resolving || a.is_resolved())
    }

    fn handle_create(&self, cmd: &CreateInventory) -> Result<Vec<InventoryCountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::validation("inventory already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("inventory number cannot be empty"));
        }
        if let InventoryType::Partial(articles) = &cmd.inventory_type {
            if articles.is_empty() {
                return Err(DomainError::validation("partial inventory needs at least one article"));
            }
        }
        Ok(vec![InventoryCountEvent::InventoryCreated(InventoryCreated {
            inventory_id: cmd.inventory_id,
            number: cmd.number.clone(),
            depot: cmd.depot,
            inventory_type: cmd.inventory_type.clone(),
            freeze_movements: cmd.freeze_movements,
            requester: cmd.requester,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_open(&self, cmd: &OpenInventory) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(InventoryStatus::Open, "open")?;

        let lines = cmd
            .snapshot
            .iter()
            .filter(|s| self.inventory_type.covers(s.article))
            .enumerate()
            .map(|(idx, s)| {
                InventoryLine::new(idx as u32 + 1, s.article, s.location, s.lot, s.theoretical_qty, s.unit_cost)
            })
            .collect();

        Ok(vec![InventoryCountEvent::InventoryOpened(InventoryOpened {
            lines,
            movements_frozen: self.freeze_requested,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddCountLine) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_counting_open("add a line to")?;

        if !self.inventory_type.covers(cmd.article) {
            return Err(DomainError::validation("article is outside this partial inventory"));
        }
        if self
            .lines
            .iter()
            .any(|l| l.article == cmd.article && l.location == cmd.location && l.lot == cmd.lot)
        {
            return Err(DomainError::validation("a line already exists for this key"));
        }

        let line_no = (self.lines.len() as u32) + 1;
        Ok(vec![InventoryCountEvent::CountLineAdded(CountLineAdded {
            line: InventoryLine::new(line_no, cmd.article, cmd.location, cmd.lot, Decimal::ZERO, cmd.unit_cost),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordCount) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_counting_open("record a count on")?;

        if cmd.quantity < Decimal::ZERO {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        let line = self
            .line(cmd.line_no)
            .ok_or_else(|| DomainError::not_found(format!("inventory {} line {}", self.number, cmd.line_no)))?;
        let variance = cmd
            .quantity
            .checked_sub(line.theoretical_qty)
            .ok_or_else(|| DomainError::validation(format!("line {}: variance out of range", line.line_no)))?;
        checked_value(variance, cmd.unit_cost)?;

        match cmd.pass {
            CountPass::First => {
                if line.counter_2 == Some(cmd.counter) {
                    return Err(DomainError::segregation(format!(
                        "line {}: first and second counts need different counters",
                        line.line_no
                    )));
                }
            }
            CountPass::Second => {
                let Some(first) = line.counter_1 else {
                    return Err(DomainError::validation(format!(
                        "line {}: second count before first count",
                        line.line_no
                    )));
                };
                if first == cmd.counter {
                    return Err(DomainError::segregation(format!(
                        "line {}: first and second counts need different counters",
                        line.line_no
                    )));
                }
            }
        }

        Ok(vec![InventoryCountEvent::CountRecorded(CountRecorded {
            line_no: cmd.line_no,
            counter: cmd.counter,
            pass: cmd.pass,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_validate(&self, cmd: &ValidateInventory) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(InventoryStatus::Validating, "validate")?;

        if let Some(uncounted) = self.lines.iter().find(|l| !l.is_counted()) {
            return Err(DomainError::validation(format!(
                "line {} has not been counted",
                uncounted.line_no
            )));
        }

        let depot = self
            .depot
            .ok_or_else(|| DomainError::validation("inventory has no depot"))?;
        let requester = self
            .requester
            .ok_or_else(|| DomainError::validation("inventory has no requester"))?;

        let mut adjustments = Vec::new();
        for line in self.lines.iter().filter(|l| !l.variance_qty.is_zero()) {
            self.ensure_independent(cmd.approver, line)?;

            let senior = line.variance_value.abs() > cmd.approval_threshold;
            adjustments.push(Adjustment {
                id: AdjustmentId::new(),
                inventory: self.id,
                line_no: line.line_no,
                key: line.key(depot),
                qty_before: line.theoretical_qty,
                qty_after: line.retained_qty.unwrap_or(line.theoretical_qty),
                variance: line.variance_qty,
                unit_cost: line.unit_cost,
                value: line.variance_value,
                motif: format!("inventory {} line {}", self.number, line.line_no),
                requester,
                approver: if senior { None } else { Some(cmd.approver) },
                approval_level: if senior { ApprovalLevel::Senior } else { ApprovalLevel::Standard },
                status: AdjustmentStatus::Pending,
                movement: None,
                waive_reason: None,
            });
        }

        let close = adjustments.is_empty();
        let mut events = vec![InventoryCountEvent::InventoryValidated(InventoryValidated {
            approver: cmd.approver,
            adjustments,
            occurred_at: cmd.occurred_at,
        })];
        if close {
            events.push(InventoryCountEvent::InventoryClosed(InventoryClosed {
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_approve(&self, cmd: &ApproveAdjustment) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        let adj = self.pending_adjustment(cmd.adjustment_id)?;
        if adj.approver.is_some() {
            return Err(DomainError::validation(format!("adjustment {} is already approved", adj.id)));
        }
        if let Some(line) = self.line(adj.line_no) {
            self.ensure_independent(cmd.approver, line)?;
        }

        Ok(vec![InventoryCountEvent::AdjustmentApproved(AdjustmentApproved {
            adjustment_id: cmd.adjustment_id,
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply(&self, cmd: &ApplyAdjustment) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        let adj = self.pending_adjustment(cmd.adjustment_id)?;
        if !adj.is_ready() {
            return Err(DomainError::validation(format!(
                "adjustment {} needs senior approval before it can be applied",
                adj.id
            )));
        }

        let mut events = vec![InventoryCountEvent::AdjustmentApplied(AdjustmentApplied {
            adjustment_id: cmd.adjustment_id,
            actor: cmd.actor,
            movement: None,
            occurred_at: cmd.occurred_at,
        })];
        if self.closes_after(cmd.adjustment_id) {
            events.push(InventoryCountEvent::InventoryClosed(InventoryClosed {
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_waive(&self, cmd: &WaiveAdjustment) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        let adj = self.pending_adjustment(cmd.adjustment_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a waiver needs a reason"));
        }
        if let Some(line) = self.line(adj.line_no) {
            self.ensure_independent(cmd.actor, line)?;
        }

        let mut events = vec![InventoryCountEvent::AdjustmentWaived(AdjustmentWaived {
            adjustment_id: cmd.adjustment_id,
            actor: cmd.actor,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })];
        if self.closes_after(cmd.adjustment_id) {
            events.push(InventoryCountEvent::InventoryClosed(InventoryClosed {
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelInventory) -> Result<Vec<InventoryCountEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(InventoryStatus::Cancelled, "cancel")?;

        if self.adjustments.iter().any(|a| a.status == AdjustmentStatus::Applied) {
            return Err(DomainError::validation(
                "cannot cancel an inventory with applied adjustments",
            ));
        }

        Ok(vec![InventoryCountEvent::InventoryCancelled(InventoryCancelled {
            actor: cmd.actor,
            reason: cmd.reason.clone(),
            discarded: self
                .adjustments
                .iter()
                .filter(|a| a.status == AdjustmentStatus::Pending)
                .map(|a| a.id)
                .collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
