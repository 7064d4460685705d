//! Catalog service

use crate::object_store::ObjectStorage;
use crate::validation::NewBook;
use library_core::{
    config::CatalogConfig,
    storage::{BookFilter, BookRepository, LoanRepository, Repositories},
    Book, BookId, Caller, Clock, Error, Genre, LoanTransaction, Result, Thumbnail, VolumeInfo,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Copies of one edition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Copies sharing the ISBN-13
    pub total: usize,
    /// Copies not on an active loan
    pub stock: usize,
}

/// Representative copy of an edition with its holding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookDetails {
    /// Oldest copy of the edition
    pub book: Book,
    /// Holding counts
    pub holding: Holding,
}

/// Book catalog
pub struct Catalog {
    books: Arc<dyn BookRepository>,
    loans: Arc<dyn LoanRepository>,
    storage: Arc<dyn ObjectStorage>,
    clock: Arc<dyn Clock>,
    config: CatalogConfig,
}

impl Catalog {
    /// Create catalog
    pub fn new(
        repos: &Repositories,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
        config: CatalogConfig,
    ) -> Self {
        Self {
            books: repos.books.clone(),
            loans: repos.loans.clone(),
            storage,
            clock,
            config,
        }
    }

    /// Add a copy. Staff only.
    pub async fn add_book(&self, caller: &Caller, input: NewBook) -> Result<Book> {
        caller.require_staff()?;

        let now = self.clock.now();
        let checked = input.check(now.date_naive())?;
        let input = checked.input;

        let book = Book {
            id: BookId::new(),
            code: input.code,
            volume: VolumeInfo {
                title: input.title,
                subtitle: input.subtitle,
                author: input.author,
            },
            publisher: input.publisher,
            published_date: checked.published_date,
            description: input.description,
            genres: checked.genres,
            isbn10: input.isbn10,
            isbn13: input.isbn13,
            page_count: input.page_count,
            thumbnail: Thumbnail::placeholder(self.config.placeholder_thumbnail_url.clone()),
            created_at: now,
            updated_at: now,
        };

        self.books.insert(book.clone()).await?;

        info!(
            code = %book.code,
            isbn13 = %book.isbn13,
            added_by = %caller.id,
            "Book added"
        );
        Ok(book)
    }

    /// Copy by code
    pub async fn find_by_code(&self, code: &str) -> Result<Book> {
        self.books
            .find_by_code(code.trim())
            .await?
            .ok_or_else(|| Error::NotFound(format!("Book {}", code)))
    }

    /// Edition details with total and available copies
    pub async fn get_book_details(&self, isbn13: &str) -> Result<BookDetails> {
        let copies = self.books.find_by_isbn13(isbn13.trim()).await?;
        let ids: Vec<BookId> = copies.iter().map(|b| b.id).collect();
        let on_loan = self.loans.count_active_for_books(&ids).await?;

        let total = copies.len();
        let book = copies
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("No book with ISBN {}", isbn13)))?;

        Ok(BookDetails {
            book,
            holding: Holding {
                total,
                stock: total.saturating_sub(on_loan),
            },
        })
    }

    /// Search by title, subtitle or author text and/or genre
    pub async fn search_books(&self, query: Option<&str>, genre: Option<Genre>) -> Result<Vec<Book>> {
        let filter = BookFilter {
            text: query
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            genre,
        };
        self.books.search(&filter).await
    }

    /// Replace a copy's thumbnail with the image at `local_file`.
    ///
    /// The local file is removed afterwards whatever the outcome.
    pub async fn change_thumbnail(
        &self,
        caller: &Caller,
        code: &str,
        local_file: &Path,
    ) -> Result<Book> {
        let result = self.replace_thumbnail(caller, code, local_file).await;
        discard_local_file(local_file).await;
        result
    }

    async fn replace_thumbnail(
        &self,
        caller: &Caller,
        code: &str,
        local_file: &Path,
    ) -> Result<Book> {
        caller.require_staff()?;
        let mut book = self.find_by_code(code).await?;

        let uploaded = self
            .storage
            .upload(local_file, &self.config.thumbnail_folder)
            .await?;

        if book.thumbnail.is_uploaded() {
            let removed = self.storage.delete(&book.thumbnail.public_id).await;
            if !matches!(removed, Ok(true)) {
                warn!(
                    code = %book.code,
                    old = %book.thumbnail.public_id,
                    new = %uploaded.public_id,
                    "Previous thumbnail could not be deleted, rolling back upload"
                );
                self.compensate_upload(&uploaded.public_id).await;
                return Err(match removed {
                    Err(e) => e,
                    Ok(_) => Error::Storage(format!(
                        "Failed to delete previous thumbnail {}",
                        book.thumbnail.public_id
                    )),
                });
            }
        }

        book.thumbnail = Thumbnail {
            public_id: uploaded.public_id,
            secure_url: uploaded.secure_url,
        };
        book.updated_at = self.clock.now();
        self.books.update(book.clone()).await?;

        info!(code = %book.code, public_id = %book.thumbnail.public_id, "Thumbnail replaced");
        Ok(book)
    }

    async fn compensate_upload(&self, public_id: &str) {
        match self.storage.delete(public_id).await {
            Ok(true) => {}
            Ok(false) => warn!(public_id, "Compensating delete found nothing to remove"),
            Err(e) => warn!(public_id, error = %e, "Compensating delete failed"),
        }
    }

    /// Delete a copy and its thumbnail. Admin only.
    pub async fn delete_book(&self, caller: &Caller, code: &str) -> Result<()> {
        caller.require_admin()?;
        let book = self.find_by_code(code).await?;

        let active: Option<LoanTransaction> = self.loans.find_active_by_book(book.id).await?;
        if let Some(loan) = active {
            return Err(Error::Conflict(format!(
                "Book {} is on loan ({})",
                book.code, loan.id
            )));
        }

        if book.thumbnail.is_uploaded() && !self.storage.delete(&book.thumbnail.public_id).await? {
            return Err(Error::Storage(format!(
                "Failed to delete thumbnail {}",
                book.thumbnail.public_id
            )));
        }

        self.books.delete(book.id).await?;

        info!(code = %book.code, deleted_by = %caller.id, "Book deleted");
        Ok(())
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn discard_local_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove uploaded file");
        }
    }
}
