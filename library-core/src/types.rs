//! Core types for the lending backend

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new time-ordered identifier
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Get the raw UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Book copy identifier (storage id, distinct from the human `code`)
    BookId
);
id_type!(
    /// User identifier
    UserId
);
id_type!(
    /// Loan transaction identifier
    TransactionId
);
id_type!(
    /// Fine identifier
    FineId
);
id_type!(
    /// Local payment identifier (the gateway order id is kept separately)
    PaymentId
);

/// Genre tag from the fixed catalog enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Genre {
    /// FICTION
    #[serde(rename = "FICTION")]
    Fiction,
    /// NON-FICTION
    #[serde(rename = "NON-FICTION")]
    NonFiction,
    /// MAGAZINE
    #[serde(rename = "MAGAZINE")]
    Magazine,
    /// NEWSPAPER
    #[serde(rename = "NEWSPAPER")]
    Newspaper,
    /// PERIODICAL
    #[serde(rename = "PERIODICAL")]
    Periodical,
    /// REFERENCE
    #[serde(rename = "REFERENCE")]
    Reference,
    /// EDUCATION/TEXTBOOKS
    #[serde(rename = "EDUCATION/TEXTBOOKS")]
    EducationTextbooks,
    /// RELIGION/SPIRITUALITY
    #[serde(rename = "RELIGION/SPIRITUALITY")]
    ReligionSpirituality,
    /// MYSTERY/THRILLER
    #[serde(rename = "MYSTERY/THRILLER")]
    MysteryThriller,
    /// FANTASY
    #[serde(rename = "FANTASY")]
    Fantasy,
    /// ROMANCE
    #[serde(rename = "ROMANCE")]
    Romance,
    /// HORROR
    #[serde(rename = "HORROR")]
    Horror,
    /// ADVENTURE
    #[serde(rename = "ADVENTURE")]
    Adventure,
    /// BIOGRAPHY/AUTOBIOGRAPHY
    #[serde(rename = "BIOGRAPHY/AUTOBIOGRAPHY")]
    BiographyAutobiography,
    /// HISTORY
    #[serde(rename = "HISTORY")]
    History,
    /// SELF-HELP
    #[serde(rename = "SELF-HELP")]
    SelfHelp,
    /// COOKING/FOOD
    #[serde(rename = "COOKING/FOOD")]
    CookingFood,
    /// TRAVEL
    #[serde(rename = "TRAVEL")]
    Travel,
    /// COMICS/GRAPHIC NOVELS
    #[serde(rename = "COMICS/GRAPHIC NOVELS")]
    ComicsGraphicNovels,
    /// DRAMA
    #[serde(rename = "DRAMA")]
    Drama,
    /// POETRY
    #[serde(rename = "POETRY")]
    Poetry,
    /// CHILDREN'S
    #[serde(rename = "CHILDREN'S")]
    Childrens,
}

impl Genre {
    /// Every accepted genre, in catalog order
    pub const ALL: [Genre; 22] = [
        Genre::Fiction,
        Genre::NonFiction,
        Genre::Magazine,
        Genre::Newspaper,
        Genre::Periodical,
        Genre::Reference,
        Genre::EducationTextbooks,
        Genre::ReligionSpirituality,
        Genre::MysteryThriller,
        Genre::Fantasy,
        Genre::Romance,
        Genre::Horror,
        Genre::Adventure,
        Genre::BiographyAutobiography,
        Genre::History,
        Genre::SelfHelp,
        Genre::CookingFood,
        Genre::Travel,
        Genre::ComicsGraphicNovels,
        Genre::Drama,
        Genre::Poetry,
        Genre::Childrens,
    ];

    /// Catalog label
    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Fiction => "FICTION",
            Genre::NonFiction => "NON-FICTION",
            Genre::Magazine => "MAGAZINE",
            Genre::Newspaper => "NEWSPAPER",
            Genre::Periodical => "PERIODICAL",
            Genre::Reference => "REFERENCE",
            Genre::EducationTextbooks => "EDUCATION/TEXTBOOKS",
            Genre::ReligionSpirituality => "RELIGION/SPIRITUALITY",
            Genre::MysteryThriller => "MYSTERY/THRILLER",
            Genre::Fantasy => "FANTASY",
            Genre::Romance => "ROMANCE",
            Genre::Horror => "HORROR",
            Genre::Adventure => "ADVENTURE",
            Genre::BiographyAutobiography => "BIOGRAPHY/AUTOBIOGRAPHY",
            Genre::History => "HISTORY",
            Genre::SelfHelp => "SELF-HELP",
            Genre::CookingFood => "COOKING/FOOD",
            Genre::Travel => "TRAVEL",
            Genre::ComicsGraphicNovels => "COMICS/GRAPHIC NOVELS",
            Genre::Drama => "DRAMA",
            Genre::Poetry => "POETRY",
            Genre::Childrens => "CHILDREN'S",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Genre {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let label = s.trim();
        Genre::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == label)
            .ok_or_else(|| Error::Validation(format!("Invalid genre: {}", label)))
    }
}

/// Title block of a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Title
    pub title: String,
    /// Optional subtitle
    pub subtitle: Option<String>,
    /// Author
    pub author: String,
}

/// Thumbnail asset reference held by object storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    /// Object storage id; empty while the placeholder is in use
    pub public_id: String,
    /// Public URL
    pub secure_url: String,
}

impl Thumbnail {
    /// Placeholder thumbnail pointing at `url`
    pub fn placeholder(url: impl Into<String>) -> Self {
        Self {
            public_id: String::new(),
            secure_url: url.into(),
        }
    }

    /// Whether the asset lives in object storage (and must be cleaned up)
    pub fn is_uploaded(&self) -> bool {
        !self.public_id.is_empty()
    }
}

/// One physical copy in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Storage id
    pub id: BookId,
    /// Unique copy code
    pub code: String,
    /// Title block
    pub volume: VolumeInfo,
    /// Publisher
    pub publisher: String,
    /// Publication date
    pub published_date: NaiveDate,
    /// Description
    pub description: String,
    /// One to three genre tags
    pub genres: Vec<Genre>,
    /// ISBN-10
    pub isbn10: String,
    /// ISBN-13, shared by every copy of the edition
    pub isbn13: String,
    /// Page count
    pub page_count: u32,
    /// Thumbnail
    pub thumbnail: Thumbnail,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Freeze the fields a loan keeps for its audit trail
    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            id: self.id,
            code: self.code.clone(),
            title: self.volume.title.clone(),
            subtitle: self.volume.subtitle.clone(),
            author: self.volume.author.clone(),
            publisher: self.publisher.clone(),
            isbn10: self.isbn10.clone(),
            isbn13: self.isbn13.clone(),
            genres: self.genres.clone(),
            thumbnail_url: self.thumbnail.secure_url.clone(),
        }
    }

    /// Case-insensitive substring match over title, subtitle and author.
    /// `needle` must already be lower-cased.
    pub fn matches_text(&self, needle: &str) -> bool {
        let hit = |field: &str| field.to_lowercase().contains(needle);
        hit(&self.volume.title)
            || self.volume.subtitle.as_deref().map_or(false, |s| hit(s))
            || hit(&self.volume.author)
    }
}

/// Book fields as they were when a loan was issued.
///
/// Kept on the loan on purpose: later edits to the live [`Book`] must not
/// rewrite loan history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Book id at issue time
    pub id: BookId,
    /// Copy code
    pub code: String,
    /// Title
    pub title: String,
    /// Subtitle
    pub subtitle: Option<String>,
    /// Author
    pub author: String,
    /// Publisher
    pub publisher: String,
    /// ISBN-10
    pub isbn10: String,
    /// ISBN-13
    pub isbn13: String,
    /// Genres
    pub genres: Vec<Genre>,
    /// Thumbnail URL
    pub thumbnail_url: String,
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Borrower
    User,
    /// Library staff
    Librarian,
    /// Administrator
    Admin,
}

impl Role {
    /// Staff roles may issue and return books
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Librarian | Role::Admin)
    }

    /// Wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Librarian => "LIBRARIAN",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "USER" => Ok(Role::User),
            "LIBRARIAN" => Ok(Role::Librarian),
            "ADMIN" => Ok(Role::Admin),
            other => Err(Error::Validation(format!("Invalid role: {}", other))),
        }
    }
}

/// Postal address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Country
    pub country: String,
    /// State
    pub state: String,
    /// City
    pub city: String,
    /// Postal code
    pub pincode: String,
    /// First address line
    pub line1: String,
    /// Second address line
    pub line2: Option<String>,
}

/// Borrower or staff member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Unique, lower-cased email
    pub email: String,
    /// Unique phone number
    pub phone: String,
    /// Credential hash produced by the auth service
    pub password_hash: String,
    /// Address
    pub address: Address,
    /// Role
    pub role: Role,
    /// Verified flag
    pub verified: bool,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Freeze the fields a loan keeps for its audit trail
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
            role: self.role,
        }
    }
}

/// User fields as they were when a loan was issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// User id
    pub id: UserId,
    /// Name
    pub name: String,
    /// Email
    pub email: String,
    /// Phone
    pub phone: String,
    /// Address
    pub address: Address,
    /// Role at issue time
    pub role: Role,
}

/// Authenticated identity performing an operation.
///
/// Produced by the auth layer and trusted as-is; only role and
/// verification are enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// User id
    pub id: UserId,
    /// Role
    pub role: Role,
    /// Verified flag
    pub verified: bool,
}

impl Caller {
    /// Create caller context
    pub fn new(id: UserId, role: Role, verified: bool) -> Self {
        Self { id, role, verified }
    }

    /// Reject unverified callers
    pub fn require_verified(&self) -> Result<()> {
        if !self.verified {
            return Err(Error::Unverified(format!("Caller {} is not verified", self.id)));
        }
        Ok(())
    }

    /// Require a verified caller holding one of `roles`
    pub fn require_role(&self, roles: &[Role]) -> Result<()> {
        self.require_verified()?;
        if !roles.contains(&self.role) {
            return Err(Error::Forbidden(format!(
                "Role {} is not allowed to perform this operation",
                self.role
            )));
        }
        Ok(())
    }

    /// Require verified librarian or admin
    pub fn require_staff(&self) -> Result<()> {
        self.require_role(&[Role::Librarian, Role::Admin])
    }

    /// Require verified admin
    pub fn require_admin(&self) -> Result<()> {
        self.require_role(&[Role::Admin])
    }

    /// Require a verified caller acting on their own records, or staff
    pub fn require_owner_or_staff(&self, owner: UserId) -> Result<()> {
        self.require_verified()?;
        if self.id != owner && !self.role.is_staff() {
            return Err(Error::Forbidden(format!(
                "User {} cannot act on records of {}",
                self.id, owner
            )));
        }
        Ok(())
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Caller::new(user.id, user.role, user.verified)
    }
}

/// Loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    /// Issued, not yet flagged overdue
    Pending,
    /// Confirmed overdue or manually fined
    Fined,
    /// Returned (terminal)
    Returned,
}

impl LoanStatus {
    /// Pending and fined loans still hold the copy
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Fined)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Fined => "FINED",
            LoanStatus::Returned => "RETURNED",
        };
        f.write_str(label)
    }
}

/// Loan of one copy to one borrower
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTransaction {
    /// Transaction id
    pub id: TransactionId,
    /// Copy on loan
    pub book: BookSnapshot,
    /// Borrower
    pub borrower: UserSnapshot,
    /// Staff member who issued the copy
    pub issued_by: UserSnapshot,
    /// Due date (end of day, UTC)
    pub due_date: DateTime<Utc>,
    /// Status
    pub status: LoanStatus,
    /// Set when the loan reaches RETURNED
    pub returned_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter
    pub version: u64,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl LoanTransaction {
    /// Whether the loan still holds the copy
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Copy id
    pub fn book_id(&self) -> BookId {
        self.book.id
    }

    /// Borrower id
    pub fn borrower_id(&self) -> UserId {
        self.borrower.id
    }
}

/// Fine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FineStatus {
    /// Awaiting payment
    Created,
    /// Payment verified
    Paid,
    /// Payment failed or was cancelled
    Rejected,
}

/// Fine raised against a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fine {
    /// Fine id
    pub id: FineId,
    /// Loan the fine belongs to
    pub transaction_id: TransactionId,
    /// Copy
    pub book_id: BookId,
    /// Borrower
    pub borrower_id: UserId,
    /// Amount in major currency units
    pub amount: Decimal,
    /// Reason
    pub reason: String,
    /// Status
    pub status: FineStatus,
    /// Payment opened for this fine
    pub payment_id: PaymentId,
    /// Optimistic concurrency counter
    pub version: u64,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Order opened at the gateway
    Created,
    /// Signature verified or settled manually
    Paid,
    /// Signature mismatch
    Failed,
    /// Cancelled by staff
    Cancelled,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentStatus::Created => "CREATED",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Gateway payment for a fine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Local id
    pub id: PaymentId,
    /// Fine being paid
    pub fine_id: FineId,
    /// Loan the fine belongs to
    pub transaction_id: TransactionId,
    /// Gateway order id
    pub order_id: String,
    /// Amount in minor currency units
    pub amount_minor: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Status
    pub status: PaymentStatus,
    /// Gateway payment id, once completed
    pub gateway_payment_id: Option<String>,
    /// Gateway signature, once verified
    pub signature: Option<String>,
    /// Optimistic concurrency counter
    pub version: u64,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}
