use crate::chat::{token_counter_by_id, ChatMessage, ChatMessageReq, Model, TokenCounter};
use crate::utils::now_millis;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
#[cfg(test)]
use crate::chat::{ChatSender, CharTokenCounter, ModelBuilder};

const PREFIX: &str = "chat_memory";

/// 决定哪些历史消息会被发送给模型
///
/// 返回的总是输入的一个连续后缀（`FixedMsgLength` 会额外跳过错误消息与触发它的用户消息），
/// 且不包含系统提示词，调用方需要自行把它放在最前面。
#[derive(Clone)]
pub enum ChatMemory {
    /// 最多保留最近 N 条
    FixedMsgLength(usize),
    /// 只保留最近一段时间内的
    FixedDuration(Duration),
    /// 按字符数截断，系统提示词的长度也计算在内
    MaxContextSize {
        max_context_size: usize,
        system_prompt: String,
    },
    /// 按模型上下文的 token 数截断
    MaxToken {
        model: Model,
        system_prompt: String,
        counter: Arc<dyn TokenCounter>,
    },
}

impl Default for ChatMemory {
    fn default() -> Self {
        ChatMemory::FixedMsgLength(2)
    }
}

impl Debug for ChatMemory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatMemory::FixedMsgLength(n) => write!(f, "FixedMsgLength({})", n),
            ChatMemory::FixedDuration(d) => write!(f, "FixedDuration({}ms)", d.as_millis()),
            ChatMemory::MaxContextSize {
                max_context_size, ..
            } => write!(f, "MaxContextSize({})", max_context_size),
            ChatMemory::MaxToken { model, .. } => write!(f, "MaxToken({})", model.id),
        }
    }
}

impl ChatMemory {
    pub fn max_token(model: Model, system_prompt: impl Into<String>) -> Self {
        let counter = token_counter_by_id(&model.token_counter_id);
        ChatMemory::MaxToken {
            model,
            system_prompt: system_prompt.into(),
            counter,
        }
    }

    /// 替换预算类策略里的系统提示词，其余策略原样返回
    pub fn with_system_prompt(self, prompt: &str) -> Self {
        match self {
            ChatMemory::MaxContextSize {
                max_context_size, ..
            } => ChatMemory::MaxContextSize {
                max_context_size,
                system_prompt: prompt.to_string(),
            },
            ChatMemory::MaxToken { model, counter, .. } => ChatMemory::MaxToken {
                model,
                system_prompt: prompt.to_string(),
                counter,
            },
            other => other,
        }
    }

    pub fn included_messages(&self, list: &[ChatMessage]) -> Vec<ChatMessage> {
        self.included_messages_at(list, now_millis())
    }

    pub fn included_messages_at(&self, list: &[ChatMessage], now: i64) -> Vec<ChatMessage> {
        match self {
            ChatMemory::FixedMsgLength(length) => fixed_length(list, *length),
            ChatMemory::FixedDuration(duration) => {
                let window = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
                let since = now.saturating_sub(window);
                match list.iter().rev().find(|m| m.timestamp > since) {
                    None => vec![],
                    Some(last) => list
                        .iter()
                        .skip_while(|m| m.timestamp < last.timestamp)
                        .cloned()
                        .collect(),
                }
            }
            ChatMemory::MaxContextSize {
                max_context_size,
                system_prompt,
            } => {
                let start = walk_back(list, system_prompt.chars().count(), *max_context_size, |m| {
                    m.content.chars().count()
                });
                list[start..].to_vec()
            }
            ChatMemory::MaxToken {
                model,
                system_prompt,
                counter,
            } => {
                let max_all_tokens = (model.max_context_tokens as f64 * 0.95) as usize;
                let max_input_tokens = max_all_tokens / 2;
                let prompt_tokens =
                    counter.count_messages(&[ChatMessageReq::text(system_prompt.clone(), "system")]);
                let remaining = max_input_tokens.saturating_sub(prompt_tokens);
                let start = walk_back(list, 0, remaining, |m| {
                    counter.count_messages(&[m.to_req()])
                });
                list[start..].to_vec()
            }
        }
    }

    /// 持久化编码，形如 `chat_memory#fixed_length#2`；预算类策略依赖运行时参数，不做编码
    pub fn encode(&self) -> Option<String> {
        match self {
            ChatMemory::FixedMsgLength(n) => Some(format!("{}#fixed_length#{}", PREFIX, n)),
            ChatMemory::FixedDuration(d) => {
                Some(format!("{}#fixed_duration#{}", PREFIX, d.as_millis()))
            }
            _ => None,
        }
    }

    /// 无法识别的字符串一律还原为默认策略
    pub fn restore(encoded: &str) -> ChatMemory {
        let parts: Vec<&str> = encoded.split('#').collect();
        if parts.len() != 3 || parts[0] != PREFIX {
            return ChatMemory::default();
        }
        match parts[1] {
            "fixed_length" => parts[2]
                .parse::<usize>()
                .map(ChatMemory::FixedMsgLength)
                .unwrap_or_default(),
            "fixed_duration" => parts[2]
                .parse::<u64>()
                .map(|ms| ChatMemory::FixedDuration(Duration::from_millis(ms)))
                .unwrap_or_default(),
            _ => ChatMemory::default(),
        }
    }
}

fn fixed_length(list: &[ChatMessage], length: usize) -> Vec<ChatMessage> {
    let mut included = VecDeque::new();
    if length == 0 {
        return vec![];
    }
    let mut i = list.len() as isize - 1;
    while i >= 0 {
        let item = &list[i as usize];
        // 错误消息且前一条是用户发的，两条一起跳过
        if item.error.is_some() && i > 0 && list[i as usize - 1].send_by_me() {
            i -= 2;
            continue;
        }
        included.push_front(item.clone());
        if included.len() >= length {
            break;
        }
        i -= 1;
    }
    included.into()
}

/// 从尾部往前累加，直到达到预算；返回保留部分的起始下标
fn walk_back<F>(list: &[ChatMessage], initial: usize, budget: usize, cost: F) -> usize
where
    F: Fn(&ChatMessage) -> usize,
{
    let mut idx = list.len();
    let mut current = initial;
    while current < budget && idx > 0 {
        idx -= 1;
        current += cost(&list[idx]);
    }
    idx
}

#[cfg(test)]
fn msg(sender: ChatSender, content: &str, timestamp: i64) -> ChatMessage {
    ChatMessage::new("bot".to_string(), sender, content.to_string(), None, timestamp)
}

#[test]
fn test_fixed_length_skips_error_with_its_user_message() {
    let a = msg(ChatSender::User, "hi", 1);
    let b = ChatMessage::bot_error("bot", "boom").at(2);
    let c = msg(ChatSender::User, "hi", 3);

    let included = ChatMemory::FixedMsgLength(2).included_messages(&[a, b, c.clone()]);

    assert_eq!(included, vec![c]);
}

#[test]
fn test_fixed_length_keeps_last_n() {
    let list: Vec<ChatMessage> = (0..5)
        .map(|i| {
            let sender = if i % 2 == 0 { ChatSender::User } else { ChatSender::Bot };
            msg(sender, &i.to_string(), i)
        })
        .collect();

    let included = ChatMemory::FixedMsgLength(3).included_messages(&list);
    assert_eq!(included, list[2..].to_vec());

    let included = ChatMemory::FixedMsgLength(10).included_messages(&list);
    assert_eq!(included, list);
}

#[test]
fn test_fixed_length_does_not_cascade_over_consecutive_errors() {
    let list = vec![
        msg(ChatSender::User, "a", 1),
        msg(ChatSender::Bot, "b", 2),
        ChatMessage::bot_error("bot", "first").at(3),
        ChatMessage::bot_error("bot", "second").at(4),
    ];

    // 第二条错误的前一条不是用户消息，所以它会被保留
    let included = ChatMemory::FixedMsgLength(2).included_messages(&list);
    assert_eq!(included, list[2..].to_vec());
}

#[test]
fn test_fixed_duration() {
    let list = vec![
        msg(ChatSender::User, "a", 80000),
        msg(ChatSender::Bot, "b", 95000),
        msg(ChatSender::User, "c", 99000),
    ];

    let memory = ChatMemory::FixedDuration(Duration::from_millis(10000));

    assert_eq!(memory.included_messages_at(&list, 100000), vec![list[2].clone()]);
    assert!(memory.included_messages_at(&list, 200000).is_empty());
    assert!(memory.included_messages_at(&[], 100000).is_empty());
}

#[test]
fn test_fixed_duration_huge_window_does_not_overflow() {
    let list = vec![msg(ChatSender::User, "a", 1)];

    for encoded in [
        "chat_memory#fixed_duration#9223372036854775808",
        "chat_memory#fixed_duration#18446744073709551615",
    ] {
        let memory = ChatMemory::restore(encoded);
        assert_eq!(memory.included_messages_at(&list, 100000), list);
    }
}

#[test]
fn test_max_context_size_boundary() {
    let list = vec![
        msg(ChatSender::User, &"a".repeat(30), 1),
        msg(ChatSender::Bot, &"b".repeat(50), 2),
        msg(ChatSender::User, &"c".repeat(30), 3),
    ];

    let memory = ChatMemory::MaxContextSize {
        max_context_size: 100,
        system_prompt: "s".repeat(20),
    };

    // 20 + 30 = 50, + 50 = 100，恰好达到预算的那条被包含，随后停止
    assert_eq!(memory.included_messages(&list), list[1..].to_vec());

    let memory = ChatMemory::MaxContextSize {
        max_context_size: 101,
        system_prompt: "s".repeat(20),
    };
    assert_eq!(memory.included_messages(&list), list);
}

#[test]
fn test_max_token_budget() -> anyhow::Result<()> {
    let model = ModelBuilder::default()
        .id("tiny")
        .name("Tiny")
        .max_context_tokens(100usize)
        .token_counter_id("char")
        .build()?;

    let list = vec![
        msg(ChatSender::User, &"a".repeat(20), 1),
        msg(ChatSender::Bot, &"b".repeat(20), 2),
        msg(ChatSender::User, &"c".repeat(20), 3),
    ];

    // floor(100 * 0.95) = 95, 95 / 2 = 47, 减去 7 个字符的系统提示词剩 40
    let memory = ChatMemory::MaxToken {
        model: model.clone(),
        system_prompt: "system!".to_string(),
        counter: Arc::new(CharTokenCounter),
    };
    assert_eq!(memory.included_messages(&list), list[1..].to_vec());

    let memory = ChatMemory::max_token(model, "s".repeat(60));
    assert!(memory.included_messages(&list).is_empty());
    Ok(())
}

#[test]
fn test_encode_restore() {
    let encoded = ChatMemory::FixedMsgLength(5).encode().unwrap();
    assert_eq!(encoded, "chat_memory#fixed_length#5");
    assert!(matches!(ChatMemory::restore(&encoded), ChatMemory::FixedMsgLength(5)));

    let encoded = ChatMemory::FixedDuration(Duration::from_millis(60000)).encode().unwrap();
    assert_eq!(encoded, "chat_memory#fixed_duration#60000");
    assert!(matches!(
        ChatMemory::restore(&encoded),
        ChatMemory::FixedDuration(d) if d == Duration::from_millis(60000)
    ));

    for bad in ["", "chat_memory", "chat_memory#fixed_length#x", "memory#fixed_length#3", "chat_memory#other#1"] {
        assert!(matches!(ChatMemory::restore(bad), ChatMemory::FixedMsgLength(2)));
    }
}
