//! 已发现的 peer 记录

use crate::session::FoundPeer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub address: String,
    pub guid: String,
    pub connected: bool,
}

impl PeerRecord {
    /// 只有已连接的 peer 才能 ping
    pub fn can_ping(&self) -> bool {
        self.connected
    }
}

impl From<FoundPeer> for PeerRecord {
    fn from(found: FoundPeer) -> Self {
        Self {
            name: found.name,
            address: found.address,
            guid: found.guid,
            connected: false,
        }
    }
}

/// 按到达顺序排列的 peer 列表，以地址为键
#[derive(Debug, Default, Clone)]
pub struct PeerList {
    peers: Vec<PeerRecord>,
}

impl PeerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入新 peer；地址已存在时原地更新名称和 guid，保留连接状态
    ///
    /// 返回更新后的记录以及是否为新记录。
    pub fn upsert(&mut self, found: FoundPeer) -> (PeerRecord, bool) {
        if let Some(existing) = self.peers.iter_mut().find(|p| p.address == found.address) {
            existing.name = found.name;
            existing.guid = found.guid;
            return (existing.clone(), false);
        }
        let record = PeerRecord::from(found);
        self.peers.push(record.clone());
        (record, true)
    }

    pub fn get(&self, address: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.address == address)
    }

    pub fn set_connected(&mut self, address: &str, connected: bool) -> Option<PeerRecord> {
        let peer = self.peers.iter_mut().find(|p| p.address == address)?;
        peer.connected = connected;
        Some(peer.clone())
    }

    pub fn remove(&mut self, address: &str) -> Option<PeerRecord> {
        let index = self.peers.iter().position(|p| p.address == address)?;
        Some(self.peers.remove(index))
    }

    pub fn connected(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter().filter(|p| p.connected)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn to_vec(&self) -> Vec<PeerRecord> {
        self.peers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(name: &str, address: &str) -> FoundPeer {
        FoundPeer {
            name: name.to_string(),
            address: address.to_string(),
            guid: format!("guid-{name}"),
        }
    }

    #[test]
    fn test_arrival_order_and_dedup() {
        let mut list = PeerList::new();
        assert!(list.upsert(found("a", "addr.a")).1);
        assert!(list.upsert(found("b", "addr.b")).1);

        list.set_connected("addr.a", true);
        let (record, is_new) = list.upsert(found("a2", "addr.a"));
        assert!(!is_new);
        assert_eq!(record.name, "a2");
        assert!(record.connected);

        let names: Vec<_> = list.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a2", "b"]);
    }

    #[test]
    fn test_remove_and_connected() {
        let mut list = PeerList::new();
        list.upsert(found("a", "addr.a"));
        list.upsert(found("b", "addr.b"));
        list.set_connected("addr.b", true);

        assert_eq!(list.connected().count(), 1);
        assert!(list.get("addr.b").unwrap().can_ping());
        assert!(!list.get("addr.a").unwrap().can_ping());

        assert_eq!(list.remove("addr.b").unwrap().name, "b");
        assert_eq!(list.remove("addr.b"), None);
        assert_eq!(list.len(), 1);
        assert_eq!(list.set_connected("missing", true), None);
    }
}
