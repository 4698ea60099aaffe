//! In-memory storage implementation
//!
//! Keeps schedules and news in process-local maps. Counts save calls so
//! callers can tell bulk saves from incremental ones.

use crate::storage::traits::{Backend, StorageError, StorageResult};
use crate::storage::{News, Schedule};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    schedules: BTreeMap<i64, Schedule>,
    news: HashMap<(i64, String), News>,
    next_schedule_id: i64,
    next_news_id: i64,
}

/// Process-local storage backend
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    save_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_news` calls so far
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    fn tables(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Database("memory tables lock poisoned".to_string()))
    }
}

impl Backend for MemoryBackend {
    fn get_schedule(&self, id: i64) -> StorageResult<Option<Schedule>> {
        Ok(self.tables()?.schedules.get(&id).cloned())
    }

    fn get_schedules(
        &self,
        owner: Option<&str>,
        url: Option<&str>,
    ) -> StorageResult<Vec<Schedule>> {
        Ok(self
            .tables()?
            .schedules
            .values()
            .filter(|s| owner.map_or(true, |o| s.owner == o))
            .filter(|s| url.map_or(true, |u| s.url == u))
            .cloned()
            .collect())
    }

    fn save_schedule(&self, schedule: &mut Schedule) -> StorageResult<bool> {
        let mut tables = self.tables()?;

        let clash = tables.schedules.values().any(|s| {
            s.id != schedule.id && s.owner == schedule.owner && s.url == schedule.url
        });
        if clash {
            return Err(StorageError::ConstraintViolation(format!(
                "schedule ({}, {}) already exists",
                schedule.owner, schedule.url
            )));
        }

        let created = schedule.id == 0;
        if created {
            tables.next_schedule_id += 1;
            schedule.id = tables.next_schedule_id;
        } else if !tables.schedules.contains_key(&schedule.id) {
            return Err(StorageError::ScheduleNotFound(schedule.id));
        }

        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(created)
    }

    fn delete_schedule(&self, id: i64) -> StorageResult<bool> {
        let mut tables = self.tables()?;
        tables.news.retain(|(schedule_id, _), _| *schedule_id != id);
        Ok(tables.schedules.remove(&id).is_some())
    }

    fn get_news(&self, schedule_id: i64, url: &str) -> StorageResult<Option<News>> {
        Ok(self
            .tables()?
            .news
            .get(&(schedule_id, url.to_string()))
            .cloned())
    }

    fn list_news(&self, schedule_id: i64) -> StorageResult<Vec<News>> {
        let mut items: Vec<News> = self
            .tables()?
            .news
            .values()
            .filter(|n| n.schedule_id == schedule_id)
            .cloned()
            .collect();
        items.sort_by_key(|n| n.id);
        Ok(items)
    }

    fn save_news(&self, items: &[News]) -> StorageResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables()?;

        for item in items {
            let key = (item.schedule_id, item.url.clone());
            let id = match tables.news.get(&key).and_then(|n| n.id) {
                Some(id) => id,
                None => {
                    tables.next_news_id += 1;
                    tables.next_news_id
                }
            };

            let mut stored = item.clone();
            stored.id = Some(id);
            tables.news.insert(key, stored);
        }
        Ok(())
    }

    fn delete_news(&self, items: &[News]) -> StorageResult<()> {
        let mut tables = self.tables()?;
        for item in items {
            tables.news.remove(&(item.schedule_id, item.url.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_save_assigns_ids() {
        let backend = MemoryBackend::new();
        let mut a = Schedule::new("alice", "http://a.com", Duration::from_secs(60));
        let mut b = Schedule::new("alice", "http://b.com", Duration::from_secs(60));

        assert!(backend.save_schedule(&mut a).unwrap());
        assert!(backend.save_schedule(&mut b).unwrap());
        assert_eq!((a.id, b.id), (1, 2));
        assert!(!backend.save_schedule(&mut a).unwrap());
    }

    #[test]
    fn test_owner_url_unique() {
        let backend = MemoryBackend::new();
        let mut a = Schedule::new("alice", "http://a.com", Duration::from_secs(60));
        backend.save_schedule(&mut a).unwrap();

        let mut dup = Schedule::new("alice", "http://a.com", Duration::from_secs(30));
        assert!(matches!(
            backend.save_schedule(&mut dup),
            Err(StorageError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_save_news_updates_in_place() {
        let backend = MemoryBackend::new();
        let mut item = News::new(1, "http://a.com/x");
        item.content = "one".to_string();
        backend.save_news(&[item.clone()]).unwrap();
        let first_id = backend.get_news(1, "http://a.com/x").unwrap().unwrap().id;

        item.content = "two".to_string();
        backend.save_news(&[item]).unwrap();

        let stored = backend.list_news(1).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "two");
        assert_eq!(stored[0].id, first_id);
        assert_eq!(backend.save_calls(), 2);
    }

    #[test]
    fn test_delete_schedule_cascades() {
        let backend = MemoryBackend::new();
        let mut s = Schedule::new("alice", "http://a.com", Duration::from_secs(60));
        backend.save_schedule(&mut s).unwrap();
        backend.save_news(&[News::new(s.id, "http://a.com/1")]).unwrap();

        assert!(backend.delete_schedule(s.id).unwrap());
        assert!(!backend.news_exists(s.id, "http://a.com/1").unwrap());
    }
}
