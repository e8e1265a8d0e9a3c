use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::PipelineError;

/// Traditional/simplified pairs, two characters per entry.
const BUILTIN_PAIRS: &str = "這这個个們们來来時时會会說说對对過过還还沒没麼么裡里後后頭头從从\
開开見见覺觉讓让給给問问題题現现樣样點点嗎吗種种東东經经關关長长學学發发動动車车電电話话\
語语國国氣气聽听寫写錢钱買买賣卖醫医愛爱歡欢謝谢請请視视實实認认識识讀读書书記记變变無无\
爲为為为與与邊边應应當当幾几機机樂乐聲声進进運运遠远間间門门隻只體体畫画風风飛飞馬马魚鱼\
鳥鸟龍龙雞鸡黃黄亂乱傳传價价優优兒儿內内兩两冊册劃划劍剑務务勝胜區区協协單单員员圖图園园\
圓圆報报場场壞坏處处備备復复夠够夢梦奮奋婦妇媽妈孫孙寧宁導导屬属幫帮廣广張张強强彈弹徑径\
懷怀戰战戲戏據据擇择數数斷断於于歲岁歷历殺杀決决況况準准溫温滿满漢汉灣湾燈灯爭争獨独環环\
產产畢毕異异盡尽眾众確确禮礼離离積积穩稳競竞筆笔節节範范糧粮紅红級级結结絕绝統统綠绿線线\
練练總总續续義义習习聞闻聯联職职腦脑舊旧藝艺萬万號号蘭兰規规親亲觀观計计訂订訊讯設设許许\
論论證证試试詩诗該该誰谁課课調调談谈講讲護护貓猫貝贝負负財财責责貴贵費费資资賽赛趙赵跡迹\
踐践軍军輕轻較较輸输轉转辦办連连週周遊游達达遲迟選选鄉乡針针鐘钟錯错鏡镜閒闲陽阳陰阴隊队\
際际險险隨随雙双雜杂難难雲云靈灵靜静頁页順顺須须頓顿領领顏颜願愿類类顯显飯饭館馆驗验髮发\
鬥斗麗丽齊齐齒齿";

/// Character-level traditional to simplified Han conversion.
#[derive(Debug, Clone)]
pub struct ScriptConverter {
    table: HashMap<char, char>,
}

impl ScriptConverter {
    pub fn builtin() -> Self {
        let chars: Vec<char> = BUILTIN_PAIRS.chars().collect();
        let table = chars
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Self { table }
    }

    /// Built-in table extended by an OpenCC `TSCharacters.txt` style file.
    pub fn with_table_file(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PipelineError::configuration(format!(
                "failed to read script table {}: {err}",
                path.display()
            ))
        })?;
        let mut converter = Self::builtin();
        converter.extend_from_str(&contents);
        Ok(converter)
    }

    fn extend_from_str(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut columns = line.split('\t');
            let (Some(source), Some(targets)) = (columns.next(), columns.next()) else {
                continue;
            };
            let mut source = source.chars();
            let (Some(from), None) = (source.next(), source.next()) else {
                // phrase entries are not character mappings
                continue;
            };
            if let Some(to) = targets.split_whitespace().next().and_then(single_char) {
                self.table.insert(from, to);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn convert(&self, text: &str) -> String {
        text.chars()
            .map(|c| self.table.get(&c).copied().unwrap_or(c))
            .collect()
    }
}

fn single_char(value: &str) -> Option<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_converts_common_characters() {
        let converter = ScriptConverter::builtin();
        assert_eq!(converter.convert("這個問題"), "这个问题");
        assert_eq!(converter.convert("abc 你好"), "abc 你好");
    }

    #[test]
    fn builtin_pairs_are_well_formed() {
        assert_eq!(BUILTIN_PAIRS.chars().count() % 2, 0);
        let converter = ScriptConverter::builtin();
        assert!(converter.len() > 200);
    }

    #[test]
    fn table_file_extends_mapping() {
        let mut converter = ScriptConverter::builtin();
        converter.extend_from_str("# comment\n臺\t台 檯\n乾隆\t乾隆\n鬱\t郁\n");
        assert_eq!(converter.convert("臺鬱"), "台郁");
        assert_eq!(converter.convert("乾"), "乾");
    }

    #[test]
    fn missing_table_file_is_configuration_error() {
        let err = ScriptConverter::with_table_file(Path::new("/nonexistent/TSCharacters.txt"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
