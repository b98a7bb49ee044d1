use chrono::{Duration, NaiveDate};
use serde::Serialize;
use thiserror::Error;

use crate::connection::DbPool;

const RESERVATION_COUNT: i64 = 96;
const STATUSES: [&str; 3] = ["completed", "confirmed", "cancelled"];

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid fixture date: {0}")]
    Date(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeedResult {
    pub reservations: i64,
    pub reviews: i64,
}

#[derive(Clone, Debug, PartialEq)]
struct ReservationFixture {
    reservation_id: i64,
    account_id: i64,
    listing_id: i64,
    status: &'static str,
    created_at: String,
    check_in: String,
    check_out: String,
    fee_host_payout_usd: f64,
    guest_count: f64,
    nights_count: f64,
    booking_window: i64,
}

#[derive(Clone, Debug, PartialEq)]
struct ReviewFixture {
    review_id: String,
    reservation_id: i64,
    overall_rating: f64,
    cleaniness_rating: f64,
    location_rating: f64,
}

/// Deterministic demo rows spread over 2024 and 2025, four reservations per month.
pub struct DemoDataset;

impl DemoDataset {
    /// Replaces the dataset contents with the demo rows.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, FixtureError> {
        let reservations = reservations()?;
        let reviews = reviews(&reservations);

        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM reviews").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM reservations").execute(&mut *tx).await?;

        for reservation in &reservations {
            sqlx::query(
                "INSERT INTO reservations (reservation_id, account_id, listing_id, status, created_at, check_in, check_out, fee_host_payout_usd, guest_count, nights_count, booking_window)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(reservation.reservation_id)
            .bind(reservation.account_id)
            .bind(reservation.listing_id)
            .bind(reservation.status)
            .bind(&reservation.created_at)
            .bind(&reservation.check_in)
            .bind(&reservation.check_out)
            .bind(reservation.fee_host_payout_usd)
            .bind(reservation.guest_count)
            .bind(reservation.nights_count)
            .bind(reservation.booking_window)
            .execute(&mut *tx)
            .await?;
        }

        for review in &reviews {
            sqlx::query(
                "INSERT INTO reviews (review_id, reservation_id, overall_rating, cleaniness_rating, location_rating)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&review.review_id)
            .bind(review.reservation_id)
            .bind(review.overall_rating)
            .bind(review.cleaniness_rating)
            .bind(review.location_rating)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Self::counts(pool).await
    }

    pub async fn counts(pool: &DbPool) -> Result<SeedResult, FixtureError> {
        let reservations: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM reservations").fetch_one(pool).await?;
        let reviews: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM reviews").fetch_one(pool).await?;
        Ok(SeedResult { reservations, reviews })
    }
}

fn reservations() -> Result<Vec<ReservationFixture>, FixtureError> {
    (0..RESERVATION_COUNT)
        .map(|index| {
            let month_index = index / 4;
            let year = 2024 + (month_index / 12) as i32;
            let month = (month_index % 12) as u32 + 1;
            let day = (index % 4) as u32 * 7 + 1;
            let created = NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|date| date.and_hms_opt(9 + (index % 8) as u32, 15, 0))
                .ok_or_else(|| FixtureError::Date(format!("{year}-{month}-{day}")))?;

            let booking_window = (index * 5) % 60 + 3;
            let nights = (index % 6) + 1;
            let check_in = created.date() + Duration::days(booking_window);
            let check_out = check_in + Duration::days(nights);

            Ok(ReservationFixture {
                reservation_id: index + 1,
                account_id: 5000 + index % 17,
                listing_id: 100 + index % 9,
                status: STATUSES[(index % 3) as usize],
                created_at: created.format("%Y-%m-%d %H:%M:%S").to_string(),
                check_in: check_in.format("%Y-%m-%d").to_string(),
                check_out: check_out.format("%Y-%m-%d").to_string(),
                fee_host_payout_usd: 85.0 * nights as f64 + (index % 7) as f64 * 12.5,
                guest_count: ((index % 4) + 1) as f64,
                nights_count: nights as f64,
                booking_window,
            })
        })
        .collect()
}

fn reviews(reservations: &[ReservationFixture]) -> Vec<ReviewFixture> {
    reservations
        .iter()
        .filter(|reservation| reservation.status == "completed")
        .map(|reservation| {
            let seed = reservation.reservation_id;
            ReviewFixture {
                review_id: format!("{}", 900_000 + seed),
                reservation_id: seed,
                overall_rating: 3.0 + (seed % 3) as f64,
                cleaniness_rating: 2.5 + (seed % 5) as f64 * 0.5,
                location_rating: 4.0 + (seed % 2) as f64,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{reservations, reviews, DemoDataset};
    use crate::{connect_with_settings, migrations::run_pending};

    #[test]
    fn fixture_rows_are_deterministic_and_consistent() {
        let first = reservations().expect("fixtures");
        let second = reservations().expect("fixtures");
        assert_eq!(first, second);
        assert_eq!(first.len(), 96);
        assert!(first.iter().all(|row| row.check_in < row.check_out));

        let reviews = reviews(&first);
        assert_eq!(reviews.len(), 32);
        assert!(reviews.iter().all(|review| review.review_id.parse::<i64>().is_ok()));
    }

    #[tokio::test]
    async fn load_replaces_previous_contents() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");

        let first = DemoDataset::load(&pool).await.expect("first load");
        let second = DemoDataset::load(&pool).await.expect("second load");

        assert_eq!(first, second);
        assert_eq!(first.reservations, 96);
        assert_eq!(first.reviews, 32);

        let q1_guests: f64 = sqlx::query_scalar(
            "SELECT AVG(guest_count) FROM reservations WHERE strftime('%Y', created_at) = '2025' AND CAST(strftime('%m', created_at) AS INTEGER) IN (1, 2, 3)",
        )
        .fetch_one(&pool)
        .await
        .expect("q1 average");
        assert!((q1_guests - 2.5).abs() < f64::EPSILON);
    }
}
