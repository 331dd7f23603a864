use crate::Database;
use crate::models::{IdeaRow, MessageRow, ThreadRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

/// Normalize an unordered participant pair to (low, high).
pub fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        role: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, name, email, password_hash, role, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(
                conn,
                "SELECT id, name, email, password, role, plan, is_entitled, expires_at, created_at
                 FROM users WHERE email = ?1 COLLATE NOCASE",
                email,
            )
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(
                conn,
                "SELECT id, name, email, password, role, plan, is_entitled, expires_at, created_at
                 FROM users WHERE id = ?1",
                id,
            )
        })
    }

    /// Overwrite a user's plan state in one atomic record update.
    /// Returns false when the user does not exist.
    pub fn apply_grant(
        &self,
        user_id: &str,
        plan: &str,
        expires_at: Option<&str>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE users SET plan = ?2, is_entitled = 1, expires_at = ?3 WHERE id = ?1",
                (user_id, plan, expires_at),
            )?;
            Ok(n > 0)
        })
    }

    /// One-shot invalidation of a single plan. The WHERE clause makes this a
    /// narrow conditional update, so a concurrent writer cannot resurrect an
    /// already-consumed entitlement. Returns true iff a row flipped.
    pub fn consume_single(&self, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_entitled = 0
                 WHERE id = ?1 AND plan = 'single' AND is_entitled = 1",
                [user_id],
            )?;
            Ok(n > 0)
        })
    }

    // -- Webhook sale dedup --

    /// Record a processed sale id. Returns false if the id was already seen.
    pub fn record_sale(
        &self,
        sale_id: &str,
        user_id: &str,
        plan: &str,
        processed_at: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO processed_sales (sale_id, user_id, plan, processed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (sale_id, user_id, plan, processed_at),
            )?;
            Ok(n > 0)
        })
    }

    /// (user_id, plan) of a previously processed sale, if any.
    pub fn get_processed_sale(&self, sale_id: &str) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, plan FROM processed_sales WHERE sale_id = ?1",
                [sale_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    // -- Ideas --

    pub fn insert_idea(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
        description: &str,
        video_url: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO ideas (id, user_id, title, description, video_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, user_id, title, description, video_url, created_at),
            )?;
            Ok(())
        })
    }

    pub fn list_ideas(&self, limit: u32) -> Result<Vec<IdeaRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, description, video_url, created_at
                 FROM ideas ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(IdeaRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        title: row.get(2)?,
                        description: row.get(3)?,
                        video_url: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn thread_exists(&self, a: &str, b: &str) -> Result<bool> {
        let (low, high) = pair_key(a, b);
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversations WHERE low_id = ?1 AND high_id = ?2",
                    (low, high),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Idempotent thread creation: insert the normalized pair and the
    /// initiating message in one transaction. The pair primary key is the
    /// race guard — a constraint conflict means another call won, and the
    /// existing thread is the answer. Returns true iff this call created it.
    pub fn start_thread(
        &self,
        sender_id: &str,
        receiver_id: &str,
        message_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<bool> {
        let (low, high) = pair_key(sender_id, receiver_id);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let created = match tx.execute(
                "INSERT INTO conversations (low_id, high_id, created_at) VALUES (?1, ?2, ?3)",
                (low, high, created_at),
            ) {
                Ok(_) => true,
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    false
                }
                Err(e) => return Err(e.into()),
            };

            if created {
                tx.execute(
                    "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    (message_id, sender_id, receiver_id, content, created_at),
                )?;
            }

            tx.commit()?;
            Ok(created)
        })
    }

    /// Append a reply to an existing thread. Returns false (and inserts
    /// nothing) when no thread exists for the pair.
    pub fn insert_reply(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<bool> {
        let (low, high) = pair_key(sender_id, receiver_id);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let found: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE low_id = ?1 AND high_id = ?2",
                    (low, high),
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, sender_id, receiver_id, content, created_at),
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Messages between a pair, oldest first (`created_at` defines
    /// conversation order). `after` is a cursor: pass the `created_at` of
    /// the newest message already seen to fetch only what followed it.
    pub fn get_pair_messages(
        &self,
        a: &str,
        b: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE ((sender_id = ?1 AND receiver_id = ?2)
                     OR (sender_id = ?2 AND receiver_id = ?1))
                   AND (?4 IS NULL OR created_at > ?4)
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![a, b, limit, after], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Threads involving a user, most recent activity first. JOINs the peer's
    /// name and the latest message in a single query (no N+1).
    pub fn list_threads_for(&self, user_id: &str) -> Result<Vec<ThreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN c.low_id = ?1 THEN c.high_id ELSE c.low_id END AS peer_id,
                        u.name, m.content, m.created_at
                 FROM conversations c
                 JOIN users u ON u.id = CASE WHEN c.low_id = ?1 THEN c.high_id ELSE c.low_id END
                 JOIN messages m ON m.id = (
                     SELECT id FROM messages
                     WHERE (sender_id = c.low_id AND receiver_id = c.high_id)
                        OR (sender_id = c.high_id AND receiver_id = c.low_id)
                     ORDER BY created_at DESC, id DESC LIMIT 1)
                 WHERE c.low_id = ?1 OR c.high_id = ?1
                 ORDER BY m.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ThreadRow {
                        peer_id: row.get(0)?,
                        peer_name: row.get(1)?,
                        last_message: row.get(2)?,
                        last_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_pair_messages(&self, a: &str, b: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)",
                (a, b),
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }
}

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    let row = stmt
        .query_row([key], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                role: row.get(4)?,
                plan: row.get(5)?,
                is_entitled: row.get::<_, i64>(6)? != 0,
                expires_at: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .optional()?;
    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn seed_user(db: &Database, role: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let email = format!("{id}@example.com");
        db.create_user(&id, "Test", &email, "hash", role, &chrono::Utc::now().to_rfc3339())
            .unwrap();
        id
    }

    #[test]
    fn email_lookup_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, "Ana", "Ana@Example.COM", "hash", "giver", &chrono::Utc::now().to_rfc3339())
            .unwrap();

        let row = db.get_user_by_email("ana@example.com").unwrap().unwrap();
        assert_eq!(row.id, id);
    }

    #[test]
    fn grant_overwrites_and_consume_is_conditional() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "giver");

        assert!(db.apply_grant(&id, "single", None).unwrap());
        let row = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(row.plan.as_deref(), Some("single"));
        assert!(row.is_entitled);

        assert!(db.consume_single(&id).unwrap());
        // second consume finds nothing to flip
        assert!(!db.consume_single(&id).unwrap());

        // re-grant resets the state (overwrite, no merge)
        let exp = "2031-01-01T00:00:00+00:00";
        assert!(db.apply_grant(&id, "unlimited", Some(exp)).unwrap());
        let row = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(row.plan.as_deref(), Some("unlimited"));
        assert!(row.is_entitled);
        assert_eq!(row.expires_at.as_deref(), Some(exp));
        // consume never applies to unlimited
        assert!(!db.consume_single(&id).unwrap());
    }

    #[test]
    fn sale_dedup_records_once() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "giver");
        let now = chrono::Utc::now().to_rfc3339();

        assert!(db.record_sale("S-1", &id, "single", &now).unwrap());
        assert!(!db.record_sale("S-1", &id, "unlimited", &now).unwrap());

        let (uid, plan) = db.get_processed_sale("S-1").unwrap().unwrap();
        assert_eq!(uid, id);
        assert_eq!(plan, "single");
    }

    #[test]
    fn start_thread_is_idempotent_either_direction() {
        let db = Database::open_in_memory().unwrap();
        let investor = seed_user(&db, "investor");
        let giver = seed_user(&db, "giver");
        let now = chrono::Utc::now().to_rfc3339();

        let m1 = Uuid::new_v4().to_string();
        assert!(db.start_thread(&investor, &giver, &m1, "hi", &now).unwrap());

        // same pair, opposite orientation: no second initiating message
        let m2 = Uuid::new_v4().to_string();
        assert!(!db.start_thread(&giver, &investor, &m2, "hi again", &now).unwrap());

        assert_eq!(db.count_pair_messages(&investor, &giver).unwrap(), 1);
        assert!(db.thread_exists(&giver, &investor).unwrap());
    }

    #[test]
    fn concurrent_start_thread_creates_one_message() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let investor = seed_user(&db, "investor");
        let giver = seed_user(&db, "giver");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            let (a, b) = (investor.clone(), giver.clone());
            handles.push(std::thread::spawn(move || {
                let mid = Uuid::new_v4().to_string();
                let now = chrono::Utc::now().to_rfc3339();
                db.start_thread(&a, &b, &mid, "hello", &now).unwrap()
            }));
        }

        let created: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.iter().filter(|c| **c).count(), 1);
        assert_eq!(db.count_pair_messages(&investor, &giver).unwrap(), 1);
    }

    #[test]
    fn pair_messages_paginate_with_after_cursor() {
        let db = Database::open_in_memory().unwrap();
        let investor = seed_user(&db, "investor");
        let giver = seed_user(&db, "giver");

        let t1 = "2026-08-01T00:00:01+00:00";
        let t2 = "2026-08-01T00:00:02+00:00";
        let t3 = "2026-08-01T00:00:03+00:00";
        db.start_thread(&investor, &giver, &Uuid::new_v4().to_string(), "first", t1)
            .unwrap();
        db.insert_reply(&Uuid::new_v4().to_string(), &giver, &investor, "second", t2)
            .unwrap();
        db.insert_reply(&Uuid::new_v4().to_string(), &investor, &giver, "third", t3)
            .unwrap();

        let all = db.get_pair_messages(&investor, &giver, 10, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "first");

        // only what followed the cursor
        let rest = db.get_pair_messages(&investor, &giver, 10, Some(t1)).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].content, "second");

        // limit caps the page
        let page = db.get_pair_messages(&investor, &giver, 1, None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "first");
    }

    #[test]
    fn reply_requires_existing_thread() {
        let db = Database::open_in_memory().unwrap();
        let investor = seed_user(&db, "investor");
        let giver = seed_user(&db, "giver");
        let now = chrono::Utc::now().to_rfc3339();

        let rid = Uuid::new_v4().to_string();
        assert!(!db.insert_reply(&rid, &giver, &investor, "early", &now).unwrap());

        let mid = Uuid::new_v4().to_string();
        db.start_thread(&investor, &giver, &mid, "hello", &now).unwrap();

        let rid = Uuid::new_v4().to_string();
        assert!(db.insert_reply(&rid, &giver, &investor, "reply", &now).unwrap());
        assert_eq!(db.count_pair_messages(&investor, &giver).unwrap(), 2);
    }
}
