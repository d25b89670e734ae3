use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    Availability, BookedWindow, Booking, BookingStatus, Business, Category, DatedSlot, Service,
    SlotKey, User, WeekdaySlot,
};

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp: {s}"))?
        .with_timezone(&Utc))
}

fn fmt_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date: {s}"))
}

// ── Users & Businesses ──

pub fn save_user(conn: &Connection, user: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email",
        params![user.id, user.name, user.email],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, name, email FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub fn save_business(conn: &Connection, business: &Business) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, owner_id, name) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET owner_id = excluded.owner_id, name = excluded.name",
        params![business.id, business.owner_id, business.name],
    )?;
    Ok(())
}

pub fn get_business(conn: &Connection, id: &str) -> anyhow::Result<Option<Business>> {
    let business = conn
        .query_row(
            "SELECT id, owner_id, name FROM businesses WHERE id = ?1",
            params![id],
            |row| {
                Ok(Business {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(business)
}

// ── Services ──

const SERVICE_COLUMNS: &str = "id, business_id, name, description, category, media_urls, pricing, \
     payment_settings, booking_settings, cancellation_policy, availability_mode, \
     recurring_start_date, custom_details, created_at, updated_at";

pub fn insert_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;

    let recurring_start = match &service.availability {
        Availability::Recurring {
            recurring_start_date,
            ..
        } => Some(fmt_date(recurring_start_date)),
        Availability::Dated { .. } => None,
    };

    tx.execute(
        &format!("INSERT INTO services ({SERVICE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
        params![
            service.id,
            service.business_id,
            service.name,
            service.description,
            service.category.as_str(),
            serde_json::to_string(&service.media_urls)?,
            serde_json::to_string(&service.pricing)?,
            serde_json::to_string(&service.payment_settings)?,
            serde_json::to_string(&service.booking_settings)?,
            serde_json::to_string(&service.cancellation_policy)?,
            service.availability.mode_str(),
            recurring_start,
            serde_json::to_string(&service.custom_details)?,
            fmt_ts(&service.created_at),
            fmt_ts(&service.updated_at),
        ],
    )
    .context("failed to insert service")?;

    for (position, slot) in service.availability.slots().iter().enumerate() {
        tx.execute(
            "INSERT INTO capacity_slots (service_id, slot_key, position, total_capacity, bookings_made)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                service.id,
                slot.key.as_key(),
                position as i64,
                slot.total_capacity,
                slot.bookings_made,
            ],
        )
        .context("failed to insert capacity slot")?;
    }

    tx.commit()?;
    Ok(())
}

/// Writes every configuration block except availability, whose counters
/// are only touched through the capacity functions below.
pub fn update_service(conn: &Connection, service: &Service) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET name = ?2, description = ?3, category = ?4, media_urls = ?5,
            pricing = ?6, payment_settings = ?7, booking_settings = ?8,
            cancellation_policy = ?9, custom_details = ?10, updated_at = ?11
         WHERE id = ?1",
        params![
            service.id,
            service.name,
            service.description,
            service.category.as_str(),
            serde_json::to_string(&service.media_urls)?,
            serde_json::to_string(&service.pricing)?,
            serde_json::to_string(&service.payment_settings)?,
            serde_json::to_string(&service.booking_settings)?,
            serde_json::to_string(&service.cancellation_policy)?,
            serde_json::to_string(&service.custom_details)?,
            fmt_ts(&service.updated_at),
        ],
    )?;
    Ok(count > 0)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    /// A slot that still holds bookings would be removed.
    SlotInUse(String),
    /// A slot's new capacity is below what is already booked.
    BelowBooked { slot: String, booked: u32 },
}

/// Swaps in a new availability layout, carrying over `bookings_made` for
/// slots that survive. Runs in one transaction so concurrent reservations
/// never observe a half-written layout.
pub fn replace_availability(
    conn: &Connection,
    service_id: &str,
    availability: &Availability,
    updated_at: &DateTime<Utc>,
) -> anyhow::Result<ReplaceOutcome> {
    let tx = conn.unchecked_transaction()?;

    let existing: Vec<(String, u32)> = {
        let mut stmt = tx.prepare(
            "SELECT slot_key, bookings_made FROM capacity_slots WHERE service_id = ?1",
        )?;
        let rows = stmt.query_map(params![service_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    let new_slots = availability.slots();

    for (key, booked) in &existing {
        if *booked == 0 {
            continue;
        }
        match new_slots.iter().find(|s| &s.key.as_key() == key) {
            None => return Ok(ReplaceOutcome::SlotInUse(key.clone())),
            Some(slot) if slot.total_capacity < *booked => {
                return Ok(ReplaceOutcome::BelowBooked {
                    slot: key.clone(),
                    booked: *booked,
                })
            }
            Some(_) => {}
        }
    }

    tx.execute(
        "DELETE FROM capacity_slots WHERE service_id = ?1",
        params![service_id],
    )?;

    for (position, slot) in new_slots.iter().enumerate() {
        let key = slot.key.as_key();
        let booked = existing
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, b)| *b)
            .unwrap_or(0);
        tx.execute(
            "INSERT INTO capacity_slots (service_id, slot_key, position, total_capacity, bookings_made)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![service_id, key, position as i64, slot.total_capacity, booked],
        )?;
    }

    let recurring_start = match availability {
        Availability::Recurring {
            recurring_start_date,
            ..
        } => Some(fmt_date(recurring_start_date)),
        Availability::Dated { .. } => None,
    };
    tx.execute(
        "UPDATE services SET availability_mode = ?2, recurring_start_date = ?3, updated_at = ?4
         WHERE id = ?1",
        params![
            service_id,
            availability.mode_str(),
            recurring_start,
            fmt_ts(updated_at)
        ],
    )?;

    tx.commit()?;
    Ok(ReplaceOutcome::Replaced)
}

pub fn delete_service(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM capacity_slots WHERE service_id = ?1", params![id])?;
    let count = tx.execute("DELETE FROM services WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(count > 0)
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let row = conn
        .query_row(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
            params![id],
            read_service_row,
        )
        .optional()?;

    match row {
        Some(row) => Ok(Some(assemble_service(conn, row)?)),
        None => Ok(None),
    }
}

/// Lists services where `column` equals `value`. `column` is never user input.
fn list_services_where(
    conn: &Connection,
    column: &str,
    value: &str,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(Vec<Service>, i64)> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM services WHERE {column} = ?1"),
        params![value],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services WHERE {column} = ?1
         ORDER BY created_at ASC, id ASC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![value, limit, offset], read_service_row)?;

    let mut services = vec![];
    for row in rows {
        services.push(assemble_service(conn, row?)?);
    }
    Ok((services, total))
}

pub fn list_services_by_business(
    conn: &Connection,
    business_id: &str,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(Vec<Service>, i64)> {
    list_services_where(conn, "business_id", business_id, limit, offset)
}

pub fn list_services_by_category(
    conn: &Connection,
    category: Category,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(Vec<Service>, i64)> {
    list_services_where(conn, "category", category.as_str(), limit, offset)
}

struct ServiceRow {
    id: String,
    business_id: String,
    name: String,
    description: Option<String>,
    category: String,
    media_urls: String,
    pricing: String,
    payment_settings: String,
    booking_settings: String,
    cancellation_policy: String,
    availability_mode: String,
    recurring_start_date: Option<String>,
    custom_details: String,
    created_at: String,
    updated_at: String,
}

fn read_service_row(row: &Row) -> rusqlite::Result<ServiceRow> {
    Ok(ServiceRow {
        id: row.get(0)?,
        business_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        media_urls: row.get(5)?,
        pricing: row.get(6)?,
        payment_settings: row.get(7)?,
        booking_settings: row.get(8)?,
        cancellation_policy: row.get(9)?,
        availability_mode: row.get(10)?,
        recurring_start_date: row.get(11)?,
        custom_details: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn assemble_service(conn: &Connection, row: ServiceRow) -> anyhow::Result<Service> {
    let mut stmt = conn.prepare(
        "SELECT slot_key, total_capacity, bookings_made FROM capacity_slots
         WHERE service_id = ?1 ORDER BY position ASC",
    )?;
    let slots = stmt.query_map(params![row.id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, u32>(1)?,
            r.get::<_, u32>(2)?,
        ))
    })?;

    let availability = match row.availability_mode.as_str() {
        "recurring" => {
            let start = row
                .recurring_start_date
                .as_deref()
                .context("recurring service without start date")?;
            let mut days_of_week = vec![];
            for slot in slots {
                let (key, total_capacity, bookings_made) = slot?;
                match SlotKey::parse(&key) {
                    Some(SlotKey::Weekday(day_of_week)) => days_of_week.push(WeekdaySlot {
                        day_of_week,
                        total_capacity,
                        bookings_made,
                    }),
                    _ => anyhow::bail!("invalid weekday slot key: {key}"),
                }
            }
            Availability::Recurring {
                recurring_start_date: parse_date(start)?,
                days_of_week,
            }
        }
        _ => {
            let mut dates = vec![];
            for slot in slots {
                let (key, total_capacity, bookings_made) = slot?;
                dates.push(DatedSlot {
                    date: parse_date(&key)?,
                    total_capacity,
                    bookings_made,
                });
            }
            Availability::Dated { dates }
        }
    };

    Ok(Service {
        category: Category::parse(&row.category)
            .with_context(|| format!("unknown category: {}", row.category))?,
        media_urls: serde_json::from_str(&row.media_urls).context("corrupt media_urls")?,
        pricing: serde_json::from_str(&row.pricing).context("corrupt pricing")?,
        payment_settings: serde_json::from_str(&row.payment_settings)
            .context("corrupt payment_settings")?,
        booking_settings: serde_json::from_str(&row.booking_settings)
            .context("corrupt booking_settings")?,
        cancellation_policy: serde_json::from_str(&row.cancellation_policy)
            .context("corrupt cancellation_policy")?,
        custom_details: serde_json::from_str(&row.custom_details)
            .context("corrupt custom_details")?,
        availability,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
        id: row.id,
        business_id: row.business_id,
        name: row.name,
        description: row.description,
    })
}

// ── Capacity ──

/// Adds `delta` to a slot's counter only if the result stays within both
/// `ceiling` and the stored capacity. Returns false when nothing changed.
pub fn increment_capacity(
    conn: &Connection,
    service_id: &str,
    key: &SlotKey,
    delta: u32,
    ceiling: u32,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE capacity_slots SET bookings_made = bookings_made + ?3
         WHERE service_id = ?1 AND slot_key = ?2
           AND bookings_made + ?3 <= ?4
           AND bookings_made + ?3 <= total_capacity",
        params![service_id, key.as_key(), delta, ceiling],
    )?;
    Ok(count > 0)
}

pub fn release_capacity(
    conn: &Connection,
    service_id: &str,
    key: &SlotKey,
    delta: u32,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE capacity_slots SET bookings_made = bookings_made - ?3
         WHERE service_id = ?1 AND slot_key = ?2 AND bookings_made >= ?3",
        params![service_id, key.as_key(), delta],
    )?;
    Ok(count > 0)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, user_id, service_id, booking_date, start_time, end_time, nights, \
     number_of_people, status, slot_key, pricing, payment, cancellation, expires_at, created_at, updated_at, version";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    let cancellation = booking
        .cancellation
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        &format!("INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"),
        params![
            booking.id,
            booking.user_id,
            booking.service_id,
            fmt_date(&booking.booking_date),
            fmt_ts(&booking.time_slot.start_time),
            fmt_ts(&booking.time_slot.end_time),
            booking.time_slot.nights,
            booking.number_of_people,
            booking.status.as_str(),
            booking.slot.as_key(),
            serde_json::to_string(&booking.pricing)?,
            serde_json::to_string(&booking.payment)?,
            cancellation,
            booking.expires_at.as_ref().map(fmt_ts),
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
            booking.version,
        ],
    )
    .context("failed to insert booking")?;
    Ok(())
}

/// Persists the mutable parts of a booking if nobody saved it since it was
/// read. Pricing is never rewritten. Returns false on a stale version or a
/// missing row.
pub fn update_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<bool> {
    let cancellation = booking
        .cancellation
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let count = conn.execute(
        "UPDATE bookings SET status = ?2, payment = ?3, cancellation = ?4, expires_at = ?5,
            updated_at = ?6, version = version + 1
         WHERE id = ?1 AND version = ?7",
        params![
            booking.id,
            booking.status.as_str(),
            serde_json::to_string(&booking.payment)?,
            cancellation,
            booking.expires_at.as_ref().map(fmt_ts),
            fmt_ts(&booking.updated_at),
            booking.version,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn list_bookings_where(
    conn: &Connection,
    column: &str,
    value: &str,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(Vec<Booking>, i64)> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM bookings WHERE {column} = ?1"),
        params![value],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE {column} = ?1
         ORDER BY start_time ASC, id ASC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![value, limit, offset], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok((bookings, total))
}

pub fn list_bookings_by_user(
    conn: &Connection,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(Vec<Booking>, i64)> {
    list_bookings_where(conn, "user_id", user_id, limit, offset)
}

pub fn list_bookings_by_service(
    conn: &Connection,
    service_id: &str,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(Vec<Booking>, i64)> {
    list_bookings_where(conn, "service_id", service_id, limit, offset)
}

/// Bookings that still hold capacity or may still be fulfilled.
pub fn count_active_bookings(conn: &Connection, service_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE service_id = ?1 AND status IN ('pending', 'confirmed')",
        params![service_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn parse_booking_row(row: &Row) -> anyhow::Result<Booking> {
    let booking_date: String = row.get(3)?;
    let start_time: String = row.get(4)?;
    let end_time: String = row.get(5)?;
    let status: String = row.get(8)?;
    let slot_key: String = row.get(9)?;
    let pricing: String = row.get(10)?;
    let payment: String = row.get(11)?;
    let cancellation: Option<String> = row.get(12)?;
    let expires_at: Option<String> = row.get(13)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        service_id: row.get(2)?,
        booking_date: parse_date(&booking_date)?,
        time_slot: BookedWindow {
            start_time: parse_ts(&start_time)?,
            end_time: parse_ts(&end_time)?,
            nights: row.get(6)?,
        },
        number_of_people: row.get(7)?,
        status: BookingStatus::parse(&status),
        slot: SlotKey::parse(&slot_key)
            .with_context(|| format!("invalid slot key: {slot_key}"))?,
        pricing: serde_json::from_str(&pricing).context("corrupt booking pricing")?,
        payment: serde_json::from_str(&payment).context("corrupt booking payment")?,
        cancellation: cancellation
            .map(|c| serde_json::from_str(&c))
            .transpose()
            .context("corrupt booking cancellation")?,
        expires_at: expires_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        version: row.get(16)?,
    })
}
