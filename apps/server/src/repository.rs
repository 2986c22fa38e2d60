//! Storage seams and their SQLite implementation.
//!
//! The booking and payment flows only see the traits below. `SqliteStore`
//! implements all of them and carries the extra catalog / admin queries the
//! HTTP handlers need.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Pending and confirmed bookings, optionally limited to one date.
    /// Rows that fail validation are skipped.
    async fn list_active_for_availability(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ActiveBooking>, StoreError>;

    async fn create_pending(&self, booking: &NewBooking) -> Result<i64, StoreError>;

    async fn attach_checkout_session(&self, id: i64, session_id: &str) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Booking>, StoreError>;

    /// A confirmed and paid booking already carrying `session_id`.
    async fn find_paid_by_session(&self, session_id: &str) -> Result<Option<Booking>, StoreError>;

    /// Move a pending booking to confirmed/paid. Returns `false` when the
    /// booking was no longer pending.
    async fn confirm_if_pending(
        &self,
        id: i64,
        payment: &PaymentRecord,
    ) -> Result<bool, StoreError>;

    /// Cancel an active booking. Returns `false` when it was not active.
    async fn cancel(&self, id: i64) -> Result<bool, StoreError>;

    /// Cancel the still-unpaid pending booking behind an expired checkout
    /// session. `None` when no such booking is left.
    async fn release_expired_checkout(&self, session_id: &str) -> Result<Option<i64>, StoreError>;
}

#[async_trait]
pub trait TimeOffRepository: Send + Sync {
    async fn list_covering(&self, date: NaiveDate) -> Result<Vec<TimeOff>, StoreError>;
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn get_service(&self, id: i64) -> Result<Option<Service>, StoreError>;
    async fn get_variant(&self, id: i64) -> Result<Option<ServiceVariant>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_contact(&self, user_id: &str) -> Result<Option<Contact>, StoreError>;
}

const BOOKING_COLUMNS: &str = "id, user_id, service_id, variant_id, service_name, price, duration,
    appointment_date, appointment_time, status, payment_status, checkout_session_id,
    payment_intent, amount_paid, created_at, updated_at";

const SERVICE_COLUMNS: &str = "id, title, category, description, price, duration, has_variants";

const VARIANT_COLUMNS: &str =
    "id, service_id, variant_name, price, duration, requirements, sort_order";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    // ── Catalog ──

    pub async fn list_services(&self, category: Option<&str>) -> Result<Vec<Service>, StoreError> {
        let services = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services
             WHERE (? IS NULL OR category = ?)
             ORDER BY title ASC"
        ))
        .bind(category)
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(services)
    }

    pub async fn list_variants(&self, service_id: i64) -> Result<Vec<ServiceVariant>, StoreError> {
        let variants = sqlx::query_as::<_, ServiceVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM service_variants
             WHERE service_id = ? ORDER BY sort_order ASC, id ASC"
        ))
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(variants)
    }

    pub async fn create_service(&self, req: &CreateServiceRequest) -> Result<Service, StoreError> {
        let id = sqlx::query(
            "INSERT INTO services (title, category, description, price, duration, has_variants)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&req.title)
        .bind(&req.category)
        .bind(req.description.as_deref().unwrap_or(""))
        .bind(req.price)
        .bind(&req.duration)
        .bind(req.has_variants)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let service = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(service)
    }

    /// Apply the fields present in `req`. `None` when the service does not exist.
    pub async fn update_service(
        &self,
        id: i64,
        req: &UpdateServiceRequest,
    ) -> Result<Option<Service>, StoreError> {
        let updated = sqlx::query(
            "UPDATE services SET
                title = COALESCE(?, title),
                category = COALESCE(?, category),
                description = COALESCE(?, description),
                price = COALESCE(?, price),
                duration = COALESCE(?, duration),
                has_variants = COALESCE(?, has_variants)
             WHERE id = ?",
        )
        .bind(&req.title)
        .bind(&req.category)
        .bind(&req.description)
        .bind(req.price)
        .bind(&req.duration)
        .bind(req.has_variants)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        self.get_service(id).await
    }

    pub async fn delete_service(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Add a variant and flag the parent as having variants.
    /// `None` when the parent service does not exist.
    pub async fn create_variant(
        &self,
        service_id: i64,
        req: &CreateVariantRequest,
    ) -> Result<Option<ServiceVariant>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let flagged = sqlx::query("UPDATE services SET has_variants = 1 WHERE id = ?")
            .bind(service_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if flagged == 0 {
            return Ok(None);
        }

        let id = sqlx::query(
            "INSERT INTO service_variants
                (service_id, variant_name, price, duration, requirements, sort_order)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(service_id)
        .bind(&req.variant_name)
        .bind(req.price)
        .bind(&req.duration)
        .bind(&req.requirements)
        .bind(req.sort_order.unwrap_or(0))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let variant = sqlx::query_as::<_, ServiceVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM service_variants WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(variant))
    }

    pub async fn delete_variant(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM service_variants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    // ── Bookings (customer / admin views) ──

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Booking>, StoreError> {
        let bookings = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE user_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(bookings)
    }

    pub async fn counts_for_user(&self, user_id: &str) -> Result<BookingCounts, StoreError> {
        let rows: Vec<(BookingStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM bookings WHERE user_id = ? GROUP BY status",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BookingCounts::default();
        for (status, n) in rows {
            match status {
                BookingStatus::Pending => counts.pending = n,
                BookingStatus::Confirmed => counts.confirmed = n,
                BookingStatus::Completed => counts.completed = n,
                BookingStatus::Cancelled => counts.cancelled = n,
            }
        }
        Ok(counts)
    }

    pub async fn list_all_with_customers(&self) -> Result<Vec<BookingWithCustomer>, StoreError> {
        let bookings = sqlx::query_as::<_, BookingWithCustomer>(
            "SELECT b.*, u.name AS customer_name, u.email AS customer_email
             FROM bookings b
             LEFT JOIN users u ON u.id = b.user_id
             ORDER BY b.appointment_date DESC, b.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(bookings)
    }

    /// One booking with the owner's name and e-mail.
    pub async fn find_with_customer(
        &self,
        id: i64,
    ) -> Result<Option<BookingWithCustomer>, StoreError> {
        let booking = sqlx::query_as::<_, BookingWithCustomer>(
            "SELECT b.*, u.name AS customer_name, u.email AS customer_email
             FROM bookings b
             LEFT JOIN users u ON u.id = b.user_id
             WHERE b.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    pub async fn reschedule(
        &self,
        id: i64,
        date: NaiveDate,
        time: &str,
    ) -> Result<Option<Booking>, StoreError> {
        let updated = sqlx::query(
            "UPDATE bookings SET appointment_date = ?, appointment_time = ?,
                updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(date)
        .bind(time)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    // ── Users ──

    /// Erase a customer's profile and every booking they own.
    pub async fn delete_user_data(&self, user_id: &str) -> Result<DeletedUserData, StoreError> {
        let mut tx = self.pool.begin().await?;

        let bookings = sqlx::query("DELETE FROM bookings WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let profiles = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(DeletedUserData {
            bookings,
            profile: profiles > 0,
        })
    }

    /// Remember the contact details a verified session carries.
    pub async fn upsert_user(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
        role: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, email, role) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = COALESCE(excluded.name, users.name),
                email = COALESCE(excluded.email, users.email),
                role = excluded.role,
                updated_at = datetime('now')",
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for SqliteStore {
    async fn list_active_for_availability(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ActiveBooking>, StoreError> {
        let rows = sqlx::query_as::<_, ActiveBookingRow>(
            "SELECT b.id, b.service_id, b.service_name, b.appointment_date, b.appointment_time,
                    b.status, COALESCE(b.duration, s.duration) AS duration
             FROM bookings b
             LEFT JOIN services s ON s.id = b.service_id
             WHERE b.status IN ('pending', 'confirmed')
               AND (? IS NULL OR b.appointment_date = ?)
             ORDER BY b.appointment_date ASC, b.id ASC",
        )
        .bind(date)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match ActiveBooking::try_from(row) {
                Ok(booking) => Some(booking),
                Err(e) => {
                    tracing::error!("Skipping malformed booking row: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn create_pending(&self, booking: &NewBooking) -> Result<i64, StoreError> {
        let id = sqlx::query(
            "INSERT INTO bookings
                (user_id, service_id, variant_id, service_name, price, duration,
                 appointment_date, appointment_time, status, payment_status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 'unpaid')",
        )
        .bind(&booking.user_id)
        .bind(booking.service_id)
        .bind(booking.variant_id)
        .bind(&booking.service_name)
        .bind(booking.price)
        .bind(&booking.duration)
        .bind(booking.appointment_date)
        .bind(&booking.appointment_time)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn attach_checkout_session(&self, id: i64, session_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bookings SET checkout_session_id = ?, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(session_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn find_paid_by_session(&self, session_id: &str) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE checkout_session_id = ? AND status = 'confirmed' AND payment_status = 'paid'
             LIMIT 1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn confirm_if_pending(
        &self,
        id: i64,
        payment: &PaymentRecord,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE bookings SET
                status = 'confirmed',
                payment_status = 'paid',
                checkout_session_id = ?,
                payment_intent = ?,
                amount_paid = ?,
                updated_at = datetime('now')
             WHERE id = ? AND status = 'pending'",
        )
        .bind(&payment.checkout_session_id)
        .bind(&payment.payment_intent)
        .bind(payment.amount_paid)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn cancel(&self, id: i64) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE bookings SET status = 'cancelled', updated_at = datetime('now')
             WHERE id = ? AND status IN ('pending', 'confirmed')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn release_expired_checkout(&self, session_id: &str) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "UPDATE bookings SET status = 'cancelled', updated_at = datetime('now')
             WHERE checkout_session_id = ? AND status = 'pending' AND payment_status = 'unpaid'
             RETURNING id",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl TimeOffRepository for SqliteStore {
    async fn list_covering(&self, date: NaiveDate) -> Result<Vec<TimeOff>, StoreError> {
        let rows = sqlx::query_as::<_, TimeOffRow>(
            "SELECT id, title, start_date, end_date, is_all_day, start_time, end_time
             FROM time_off
             WHERE start_date <= ? AND end_date >= ?
             ORDER BY start_date ASC, id ASC",
        )
        .bind(date)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match TimeOff::try_from(row) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::error!("Skipping malformed time-off row: {}", e);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl ServiceCatalog for SqliteStore {
    async fn get_service(&self, id: i64) -> Result<Option<Service>, StoreError> {
        let service = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(service)
    }

    async fn get_variant(&self, id: i64) -> Result<Option<ServiceVariant>, StoreError> {
        let variant = sqlx::query_as::<_, ServiceVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM service_variants WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(variant)
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find_contact(&self, user_id: &str) -> Result<Option<Contact>, StoreError> {
        let contact =
            sqlx::query_as::<_, Contact>("SELECT name, email FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(contact)
    }
}
