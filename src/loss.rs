//! 인위적 패킷 손실 결정
//!
//! 엔진은 송수신 방향마다 [`DropPolicy`] 하나씩을 참조한다.
//! 드롭은 와이어에 나가는(들어오는) 것만 막고 내부 상태에는 영향을 주지 않는다.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::segment::Segment;
use crate::{Error, Result};

/// 세그먼트 드롭 여부 결정
pub trait DropPolicy: Send {
    fn should_drop(&mut self, segment: &Segment) -> bool;
}

impl<F> DropPolicy for F
where
    F: FnMut(&Segment) -> bool + Send,
{
    fn should_drop(&mut self, segment: &Segment) -> bool {
        self(segment)
    }
}

/// 손실 없음
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDrop;

impl DropPolicy for NeverDrop {
    fn should_drop(&mut self, _segment: &Segment) -> bool {
        false
    }
}

/// 균등 분포 확률 기반 드롭
#[derive(Debug)]
pub struct RandomDrop {
    probability: f64,
    rng: StdRng,
}

impl RandomDrop {
    pub fn new(probability: f64) -> Result<Self> {
        Self::check(probability)?;
        Ok(Self {
            probability,
            rng: StdRng::from_entropy(),
        })
    }

    /// 재현 가능한 시드 기반 생성 (테스트용)
    pub fn with_seed(probability: f64, seed: u64) -> Result<Self> {
        Self::check(probability)?;
        Ok(Self {
            probability,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    fn check(probability: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(Error::InvalidConfig(format!(
                "손실 확률 {}는 0.0 ~ 1.0 범위여야 함",
                probability
            )));
        }
        Ok(())
    }
}

impl DropPolicy for RandomDrop {
    fn should_drop(&mut self, _segment: &Segment) -> bool {
        self.rng.gen::<f64>() < self.probability
    }
}

/// 미리 정한 순서대로 드롭 (소진되면 더 이상 드롭하지 않음)
#[derive(Debug, Clone, Default)]
pub struct ScriptedDrop {
    decisions: VecDeque<bool>,
}

impl ScriptedDrop {
    pub fn new(decisions: impl IntoIterator<Item = bool>) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
        }
    }

    /// 남은 결정 수
    pub fn remaining(&self) -> usize {
        self.decisions.len()
    }
}

impl DropPolicy for ScriptedDrop {
    fn should_drop(&mut self, _segment: &Segment) -> bool {
        self.decisions.pop_front().unwrap_or(false)
    }
}

const INTERACTIVE_HELP: &str = "\
[d] 또는 [y]: 이 세그먼트를 드롭
[n]: 드롭하지 않음
들어오는 세그먼트를 드롭하면 수신자는 그 세그먼트를 받지 못한 것과 같고,
나가는 ACK를 드롭하면 수신자 상태는 갱신되지만 ACK는 전송되지 않는다.";

/// 터미널에서 세그먼트마다 드롭 여부를 묻는 수동 모드
///
/// 수신자 CLI의 `--manual` 용. 멀티 스레드 tokio 런타임 안에서 호출되면
/// [`tokio::task::block_in_place`] 로 입력을 기다려 다른 태스크를 막지 않는다.
/// 그 밖의 경우(current_thread 런타임, 런타임 밖)에는 호출 스레드를 블록한다.
pub struct InteractiveDrop<R, W> {
    label: String,
    input: R,
    output: W,
}

impl InteractiveDrop<io::BufReader<io::Stdin>, io::Stdout> {
    pub fn stdin(label: impl Into<String>) -> Self {
        Self::new(label, io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> InteractiveDrop<R, W> {
    pub fn new(label: impl Into<String>, input: R, output: W) -> Self {
        Self {
            label: label.into(),
            input,
            output,
        }
    }

    fn ask(&mut self, segment: &Segment) -> io::Result<bool> {
        loop {
            write!(self.output, "{} [{}] 드롭? (d/n/help): ", self.label, segment)?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // 입력 종료: 이후로는 드롭하지 않음
                return Ok(false);
            }

            match line.trim() {
                "d" | "y" => return Ok(true),
                "n" => return Ok(false),
                "help" => writeln!(self.output, "{}", INTERACTIVE_HELP)?,
                _ => writeln!(self.output, "잘못된 입력, 다시 입력하세요.")?,
            }
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> DropPolicy for InteractiveDrop<R, W> {
    fn should_drop(&mut self, segment: &Segment) -> bool {
        let multi_thread = matches!(
            Handle::try_current().map(|handle| handle.runtime_flavor()),
            Ok(RuntimeFlavor::MultiThread)
        );
        let answer = if multi_thread {
            tokio::task::block_in_place(|| self.ask(segment))
        } else {
            self.ask(segment)
        };

        match answer {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!("수동 드롭 입력 실패, 드롭하지 않음: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::SeqNo;
    use bytes::Bytes;
    use std::io::Cursor;

    fn sample() -> Segment {
        Segment::data(SeqNo::new(1), Bytes::from_static(b"ab"))
    }

    #[test]
    fn test_random_drop_extremes() {
        let mut never = RandomDrop::with_seed(0.0, 7).unwrap();
        let mut always = RandomDrop::with_seed(1.0, 7).unwrap();
        for _ in 0..100 {
            assert!(!never.should_drop(&sample()));
            assert!(always.should_drop(&sample()));
        }
    }

    #[test]
    fn test_random_drop_rejects_bad_probability() {
        assert!(RandomDrop::new(1.5).is_err());
        assert!(RandomDrop::new(-0.1).is_err());
    }

    #[test]
    fn test_random_drop_is_reproducible_with_seed() {
        let mut a = RandomDrop::with_seed(0.5, 42).unwrap();
        let mut b = RandomDrop::with_seed(0.5, 42).unwrap();
        let seq_a: Vec<bool> = (0..32).map(|_| a.should_drop(&sample())).collect();
        let seq_b: Vec<bool> = (0..32).map(|_| b.should_drop(&sample())).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn test_scripted_drop_then_passes() {
        let mut policy = ScriptedDrop::new([true, false, true]);
        assert!(policy.should_drop(&sample()));
        assert!(!policy.should_drop(&sample()));
        assert!(policy.should_drop(&sample()));
        assert_eq!(policy.remaining(), 0);
        assert!(!policy.should_drop(&sample()));
    }

    #[test]
    fn test_closure_policy() {
        let mut count = 0;
        let mut every_other = move |_: &Segment| {
            count += 1;
            count % 2 == 0
        };
        assert!(!DropPolicy::should_drop(&mut every_other, &sample()));
        assert!(DropPolicy::should_drop(&mut every_other, &sample()));
    }

    #[test]
    fn test_interactive_drop_reads_answers() {
        let input = Cursor::new(b"help\nx\nd\nn\n".to_vec());
        let mut output = Vec::new();
        {
            let mut policy = InteractiveDrop::new("incoming", input, &mut output);
            assert!(policy.should_drop(&sample()));
            assert!(!policy.should_drop(&sample()));
            // EOF
            assert!(!policy.should_drop(&sample()));
        }
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("incoming"));
        assert!(printed.contains("잘못된 입력"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interactive_drop_inside_worker() {
        let worker = tokio::spawn(async {
            let input = Cursor::new(b"d\nn\n".to_vec());
            let mut policy = InteractiveDrop::new("outgoing", input, Vec::new());
            let first = policy.should_drop(&sample());
            let second = policy.should_drop(&sample());
            (first, second, policy.output)
        });

        let (first, second, output) = worker.await.unwrap();
        assert!(first);
        assert!(!second);
        assert!(String::from_utf8(output).unwrap().contains("outgoing"));
    }
}
