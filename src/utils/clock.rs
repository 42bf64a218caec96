// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crossbeam::atomic::AtomicCell;

/// Source of wall clock milliseconds used for log append times.
pub trait Clock: Send + Sync {
    fn milliseconds(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn milliseconds(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct MockClock {
    now: AtomicCell<i64>,
}

impl MockClock {
    pub fn new(now: i64) -> Self {
        MockClock {
            now: AtomicCell::new(now),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis);
    }

    pub fn set(&self, now: i64) {
        self.now.store(now);
    }
}

impl Clock for MockClock {
    fn milliseconds(&self) -> i64 {
        self.now.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock() {
        let clock = MockClock::new(1_000);
        clock.advance(250);
        assert_eq!(clock.milliseconds(), 1_250);
        clock.set(5);
        assert_eq!(clock.milliseconds(), 5);
        assert!(SystemClock.milliseconds() > 1_600_000_000_000);
    }
}
