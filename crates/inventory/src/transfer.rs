//! Inter-depot transfer workflow (aggregate).
//!
//! DRAFT → REQUESTED → VALIDATED → IN_TRANSIT → RECEIVED, with CANCELLED
//! reachable from DRAFT/REQUESTED/VALIDATED only. The aggregate decides; the
//! transfer service performs the reservations and ledger postings a
//! transition needs before applying its events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Aggregate, AggregateRoot, ArticleId, DepotId, DomainError, LocationId, LotId, ReservationId,
    TransferId, UserId,
};
use stockledger_events::Event;

use crate::movement::MovementNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    Requested,
    Validated,
    InTransit,
    Received,
    Cancelled,
}

impl TransferStatus {
    /// Transition table.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Draft, Requested)
                | (Requested, Validated)
                | (Validated, InTransit)
                | (InTransit, Received)
                | (Draft | Requested | Validated, Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line_no: u32,
    pub article: ArticleId,
    pub lot: Option<LotId>,
    pub source_location: LocationId,
    pub dest_location: LocationId,
    pub qty_requested: Decimal,
    pub qty_shipped: Decimal,
    pub qty_received: Decimal,
    pub reservation: Option<ReservationId>,
    pub shipped: bool,
    pub received: bool,
    /// Unit cost realised by the transfer exit; prices the destination entry.
    pub unit_cost: Option<Decimal>,
}

impl TransferLine {
    /// Shipped but not yet received. Exists only here, never in a depot's projection.
    pub fn in_transit_qty(&self) -> Decimal {
        if self.received { Decimal::ZERO } else { self.qty_shipped }
    }

    /// `qty_shipped − qty_received` once received.
    pub fn variance(&self) -> Decimal {
        if self.received {
            self.qty_shipped - self.qty_received
        } else {
            Decimal::ZERO
        }
    }
}

/// Aggregate root: Transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    id: TransferId,
    number: String,
    source: Option<DepotId>,
    destination: Option<DepotId>,
    requester: Option<UserId>,
    approver: Option<UserId>,
    status: TransferStatus,
    lines: Vec<TransferLine>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            number: String::new(),
            source: None,
            destination: None,
            requester: None,
            approver: None,
            status: TransferStatus::Draft,
            lines: Vec::new(),
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn source(&self) -> Option<DepotId> {
        self.source
    }

    pub fn destination(&self) -> Option<DepotId> {
        self.destination
    }

    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    pub fn approver(&self) -> Option<UserId> {
        self.approver
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&TransferLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    /// Lines received with a non-zero variance (flagged for review).
    pub fn flagged_lines(&self) -> Vec<u32> {
        self.lines
            .iter()
            .filter(|l| !l.variance().is_zero())
            .map(|l| l.line_no)
            .collect()
    }

    /// Reservations still held at the source (requested, not yet shipped).
    pub fn held_reservations(&self) -> Vec<ReservationId> {
        self.lines
            .iter()
            .filter(|l| !l.shipped)
            .filter_map(|l| l.reservation)
            .collect()
    }
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub number: String,
    pub source: DepotId,
    pub destination: DepotId,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddTransferLine (DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTransferLine {
    pub article: ArticleId,
    pub lot: Option<LotId>,
    pub source_location: LocationId,
    pub dest_location: LocationId,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestTransfer. Carries the reservation id the service will use per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransfer {
    pub reservations: Vec<(u32, ReservationId)>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateTransfer {
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipLine {
    pub line_no: u32,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub line_no: u32,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Create(CreateTransfer),
    AddLine(AddTransferLine),
    Request(RequestTransfer),
    Validate(ValidateTransfer),
    Ship(ShipLine),
    Receive(ReceiveLine),
    Cancel(CancelTransfer),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: TransferId,
    pub number: String,
    pub source: DepotId,
    pub destination: DepotId,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineAdded {
    pub line: TransferLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequested {
    pub reservations: Vec<(u32, ReservationId)>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferValidated {
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferLineShipped. `unit_cost`/`movements` are filled in by the
/// service once the EXIT_TRANSFER posting succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineShipped {
    pub line_no: u32,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub movements: Vec<MovementNumber>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineReceived {
    pub line_no: u32,
    pub quantity: Decimal,
    pub variance: Decimal,
    pub movements: Vec<MovementNumber>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub flagged_lines: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub actor: UserId,
    pub reason: String,
    pub released: Vec<ReservationId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferCreated(TransferCreated),
    TransferLineAdded(TransferLineAdded),
    TransferRequested(TransferRequested),
    TransferValidated(TransferValidated),
    TransferLineShipped(TransferLineShipped),
    TransferLineReceived(TransferLineReceived),
    TransferCompleted(TransferCompleted),
    TransferCancelled(TransferCancelled),
}

impl TransferEvent {
    /// Attach the ledger postings performed for a ship/receive event.
    pub fn record_postings(&mut self, cost: Decimal, numbers: &[MovementNumber]) {
        match self {
            TransferEvent::TransferLineShipped(e) => {
                e.unit_cost = cost;
                e.movements = numbers.to_vec();
            }
            TransferEvent::TransferLineReceived(e) => e.movements = numbers.to_vec(),
            _ => {}
        }
    }
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "stock.transfer.created",
            TransferEvent::TransferLineAdded(_) => "stock.transfer.line_added",
            TransferEvent::TransferRequested(_) => "stock.transfer.requested",
            TransferEvent::TransferValidated(_) => "stock.transfer.validated",
            TransferEvent::TransferLineShipped(_) => "stock.transfer.line_shipped",
            TransferEvent::TransferLineReceived(_) => "stock.transfer.line_received",
            TransferEvent::TransferCompleted(_) => "stock.transfer.received",
            TransferEvent::TransferCancelled(_) => "stock.transfer.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferCreated(e) => e.occurred_at,
            TransferEvent::TransferLineAdded(e) => e.occurred_at,
            TransferEvent::TransferRequested(e) => e.occurred_at,
            TransferEvent::TransferValidated(e) => e.occurred_at,
            TransferEvent::TransferLineShipped(e) => e.occurred_at,
            TransferEvent::TransferLineReceived(e) => e.occurred_at,
            TransferEvent::TransferCompleted(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferCreated(e) => {
                self.id = e.transfer_id;
                self.number = e.number.clone();
                self.source = Some(e.source);
                self.destination = Some(e.destination);
                self.requester = Some(e.requester);
                self.status = TransferStatus::Draft;
                self.created = true;
            }
            TransferEvent::TransferLineAdded(e) => self.lines.push(e.line.clone()),
            TransferEvent::TransferRequested(e) => {
                for (line_no, reservation) in &e.reservations {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == *line_no) {
                        line.reservation = Some(*reservation);
                    }
                }
                self.status = TransferStatus::Requested;
            }
            TransferEvent::TransferValidated(e) => {
                self.approver = Some(e.approver);
                self.status = TransferStatus::Validated;
            }
            TransferEvent::TransferLineShipped(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.qty_shipped = e.quantity;
                    line.shipped = true;
                    line.unit_cost = Some(e.unit_cost);
                }
                self.status = TransferStatus::InTransit;
            }
            TransferEvent::TransferLineReceived(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.qty_received = e.quantity;
                    line.received = true;
                }
            }
            TransferEvent::TransferCompleted(_) => self.status = TransferStatus::Received,
            TransferEvent::TransferCancelled(e) => {
                self.cancel_reason = Some(e.reason.clone());
                self.status = TransferStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Create(cmd) => self.handle_create(cmd),
            TransferCommand::AddLine(cmd) => self.handle_add_line(cmd),
            TransferCommand::Request(cmd) => self.handle_request(cmd),
            TransferCommand::Validate(cmd) => self.handle_validate(cmd),
            TransferCommand::Ship(cmd) => self.handle_ship(cmd),
            TransferCommand::Receive(cmd) => self.handle_receive(cmd),
            TransferCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Transfer {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("transfer {}", self.id)));
        }
        Ok(())
    }

    fn ensure_transition(&self, next: TransferStatus, action: &'static str) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::transition("transfer", self.status, action));
        }
        Ok(())
    }

    fn line_or_err(&self, line_no: u32) -> Result<&TransferLine, DomainError> {
        self.line(line_no)
            .ok_or_else(|| DomainError::not_found(format!("transfer {} line {line_no}", self.number)))
    }

    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::validation("transfer already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("transfer number cannot be empty"));
        }
        if cmd.source == cmd.destination {
            return Err(DomainError::validation("source and destination depots must differ"));
        }
        Ok(vec![TransferEvent::TransferCreated(TransferCreated {
            transfer_id: cmd.transfer_id,
            number: cmd.number.clone(),
            source: cmd.source,
            destination: cmd.destination,
            requester: cmd.requester,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddTransferLine) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != TransferStatus::Draft {
            return Err(DomainError::transition("transfer", self.status, "add a line to"));
        }
        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("requested quantity must be positive"));
        }

        let line_no = (self.lines.len() as u32) + 1;
        Ok(vec![TransferEvent::TransferLineAdded(TransferLineAdded {
            line: TransferLine {
                line_no,
                article: cmd.article,
                lot: cmd.lot,
                source_location: cmd.source_location,
                dest_location: cmd.dest_location,
                qty_requested: cmd.quantity,
                qty_shipped: Decimal::ZERO,
                qty_received: Decimal::ZERO,
                reservation: None,
                shipped: false,
                received: false,
                unit_cost: None,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request(&self, cmd: &RequestTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(TransferStatus::Requested, "request")?;

        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot request a transfer without lines"));
        }
        for line in &self.lines {
            if line.qty_requested <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "line {} has a non-positive requested quantity",
                    line.line_no
                )));
            }
            if !cmd.reservations.iter().any(|(n, _)| *n == line.line_no) {
                return Err(DomainError::validation(format!(
                    "no reservation supplied for line {}",
                    line.line_no
                )));
            }
        }

        Ok(vec![TransferEvent::TransferRequested(TransferRequested {
            reservations: cmd.reservations.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_validate(&self, cmd: &ValidateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(TransferStatus::Validated, "validate")?;

        if self.requester == Some(cmd.approver) {
            return Err(DomainError::segregation(format!(
                "transfer {}: the requester cannot validate their own transfer",
                self.number
            )));
        }

        Ok(vec![TransferEvent::TransferValidated(TransferValidated {
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipLine) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        if !matches!(self.status, TransferStatus::Validated | TransferStatus::InTransit) {
            return Err(DomainError::transition("transfer", self.status, "ship"));
        }

        let line = self.line_or_err(cmd.line_no)?;
        if line.shipped {
            return Err(DomainError::validation(format!("line {} already shipped", line.line_no)));
        }
        if cmd.quantity <= Decimal::ZERO || cmd.quantity > line.qty_requested {
            return Err(DomainError::validation(format!(
                "line {}: shipped quantity {} must be in (0, {}]",
                line.line_no, cmd.quantity, line.qty_requested
            )));
        }

        Ok(vec![TransferEvent::TransferLineShipped(TransferLineShipped {
            line_no: cmd.line_no,
            quantity: cmd.quantity,
            unit_cost: Decimal::ZERO,
            movements: Vec::new(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveLine) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != TransferStatus::InTransit {
            return Err(DomainError::transition("transfer", self.status, "receive"));
        }

        let line = self.line_or_err(cmd.line_no)?;
        if !line.shipped {
            return Err(DomainError::validation(format!("line {} has not been shipped", line.line_no)));
        }
        if line.received {
            return Err(DomainError::validation(format!("line {} already received", line.line_no)));
        }
        if cmd.quantity < Decimal::ZERO || cmd.quantity > line.qty_shipped {
            return Err(DomainError::validation(format!(
                "line {}: received quantity {} must be in [0, {}]",
                line.line_no, cmd.quantity, line.qty_shipped
            )));
        }

        let variance = line.qty_shipped - cmd.quantity;
        let mut events = vec![TransferEvent::TransferLineReceived(TransferLineReceived {
            line_no: cmd.line_no,
            quantity: cmd.quantity,
            variance,
            movements: Vec::new(),
            occurred_at: cmd.occurred_at,
        })];

        let all_received = self
            .lines
            .iter()
            .all(|l| l.received || l.line_no == cmd.line_no);
        if all_received {
            let mut flagged: Vec<u32> = self.flagged_lines();
            if !variance.is_zero() {
                flagged.push(cmd.line_no);
                flagged.sort_unstable();
            }
            events.push(TransferEvent::TransferCompleted(TransferCompleted {
                flagged_lines: flagged,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(TransferStatus::Cancelled, "cancel")?;

        Ok(vec![TransferEvent::TransferCancelled(TransferCancelled {
            actor: cmd.actor,
            reason: cmd.reason.clone(),
            released: self.held_reservations(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
